//! Image encoding: raw upload bytes → base64 payload for the vision API.
//!
//! Photos are forwarded as-is (no re-encoding): phone cameras already produce
//! JPEGs the vision models read well, and recompressing handwriting only adds
//! artefacts. The format is sniffed from magic bytes rather than trusted from
//! the file extension, so the MIME type in the request always matches the
//! payload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Formats accepted for handwritten pages.
pub const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// A page ready to attach to a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// e.g. `"image/jpeg"`.
    pub mime_type: String,
    /// Standard base64 of the original bytes.
    pub data: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("image is empty")]
    Empty,

    #[error("image is {size} bytes, larger than the {max}-byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt image: {0}")]
    Corrupt(String),
}

/// Validate and encode one page.
///
/// Rejects empty payloads, payloads over `max_bytes`, formats outside
/// [`SUPPORTED_FORMATS`], and images whose header does not decode to a
/// non-zero size.
pub fn encode_image(bytes: &[u8], max_bytes: usize) -> Result<EncodedImage, EncodeError> {
    if bytes.is_empty() {
        return Err(EncodeError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(EncodeError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    let format = image::guess_format(bytes)
        .map_err(|_| EncodeError::UnsupportedFormat("unrecognised file signature".into()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(EncodeError::UnsupportedFormat(format!("{format:?}")));
    }

    let mut reader = ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| EncodeError::Corrupt(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(EncodeError::Corrupt(format!("zero-sized image {width}x{height}")));
    }

    let data = STANDARD.encode(bytes);
    debug!(
        "Encoded {:?} {}x{} image → {} bytes base64",
        format,
        width,
        height,
        data.len()
    );

    Ok(EncodedImage {
        mime_type: format.to_mime_type().to_string(),
        data,
        width,
        height,
    })
}
