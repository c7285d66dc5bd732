//! Image references and the source that turns them into bytes.
//!
//! An exercise arrives as an ordered list of [`ImageRef`]s: local paths,
//! HTTP(S) URLs, or in-memory blobs handed over by an upload handler. The
//! [`ImageSource`] trait is the seam between the pipeline and wherever the
//! bytes live; [`FsImageSource`] covers the file system and plain HTTP.
//! Callers with their own storage (object store, database) implement the
//! trait and inject it through [`crate::config::AnalysisConfigBuilder::image_source`].

use crate::error::ImageLoadError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One input image, as the caller referenced it.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Local file.
    Path(PathBuf),
    /// HTTP or HTTPS URL, downloaded on load.
    Url(String),
    /// Bytes already in memory; `label` is reported as the image's path.
    Bytes { label: String, data: Arc<[u8]> },
}

impl ImageRef {
    /// Interpret a user-supplied string: http(s) URLs become [`ImageRef::Url`],
    /// anything else a [`ImageRef::Path`].
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            ImageRef::Url(input.to_string())
        } else {
            ImageRef::Path(PathBuf::from(input))
        }
    }

    /// An in-memory image.
    pub fn bytes(label: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        ImageRef::Bytes {
            label: label.into(),
            data: Arc::from(data.into()),
        }
    }

    /// The reference as the caller gave it; stored verbatim in
    /// [`crate::MathExercise::image_paths`].
    pub fn label(&self) -> String {
        match self {
            ImageRef::Path(p) => p.to_string_lossy().into_owned(),
            ImageRef::Url(u) => u.clone(),
            ImageRef::Bytes { label, .. } => label.clone(),
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Path(p) => f.debug_tuple("Path").field(p).finish(),
            ImageRef::Url(u) => f.debug_tuple("Url").field(u).finish(),
            ImageRef::Bytes { label, data } => f
                .debug_struct("Bytes")
                .field("label", label)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        ImageRef::parse(s)
    }
}

impl From<String> for ImageRef {
    fn from(s: String) -> Self {
        ImageRef::parse(&s)
    }
}

impl From<PathBuf> for ImageRef {
    fn from(p: PathBuf) -> Self {
        ImageRef::Path(p)
    }
}

impl From<&Path> for ImageRef {
    fn from(p: &Path) -> Self {
        ImageRef::Path(p.to_path_buf())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Capability to fetch the raw bytes behind an [`ImageRef`].
///
/// Implementations must be reentrant: one source is shared by every
/// concurrent request.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, ImageLoadError>;
}

/// Reads local files and downloads URLs. In-memory blobs pass through.
#[derive(Debug, Clone)]
pub struct FsImageSource {
    download_timeout_secs: u64,
}

impl FsImageSource {
    pub fn new(download_timeout_secs: u64) -> Self {
        Self {
            download_timeout_secs,
        }
    }
}

impl Default for FsImageSource {
    fn default() -> Self {
        Self::new(60)
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn fetch(&self, image: &ImageRef) -> Result<Vec<u8>, ImageLoadError> {
        match image {
            ImageRef::Path(path) => read_local(path).await,
            ImageRef::Url(url) => download_url(url, self.download_timeout_secs).await,
            ImageRef::Bytes { data, .. } => Ok(data.to_vec()),
        }
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, ImageLoadError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ImageLoadError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ImageLoadError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(ImageLoadError::Unreadable(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ImageLoadError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ImageLoadError::DownloadFailed {
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ImageLoadError::DownloadTimeout { secs: timeout_secs }
        } else {
            ImageLoadError::DownloadFailed {
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ImageLoadError::DownloadFailed {
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ImageLoadError::DownloadFailed {
            reason: e.to_string(),
        })?;

    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}
