//! Request-scoped pipeline state and the page router.
//!
//! A [`PipelineState`] is created per request, owned by the task driving
//! that request, and dropped with it. Its fields only grow through the
//! methods below, which enforce the ordering invariants:
//!
//! * `encoded` is set once, all-or-nothing, with one payload per image;
//! * after page `i` is analysed and structured,
//!   `raw_analyses.len() == structured.len() == cursor + 1`;
//! * `combined` is set only after the last page is structured.
//!
//! Errors are not stored here. Every stage returns `Result`, so the first
//! failure propagates with `?` and the remaining stages never run.

use crate::error::AnalysisError;
use crate::output::{AnalysisOutput, AnalysisStats, ExerciseAnalysis, MathExercise};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::input::ImageRef;

/// Where the pipeline goes after a page is structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Analyse the page at this 0-based index next.
    Analyze(usize),
    /// All pages are done; merge them.
    Combine,
}

/// The only branch in the pipeline.
///
/// `cursor` strictly increases and is bounded by `total`, so the page loop
/// always terminates.
pub fn route(cursor: usize, total: usize) -> Route {
    if cursor + 1 < total {
        Route::Analyze(cursor + 1)
    } else {
        Route::Combine
    }
}

#[derive(Debug)]
pub struct PipelineState {
    session_id: String,
    images: Vec<ImageRef>,
    encoded: Vec<EncodedImage>,
    cursor: usize,
    raw_analyses: Vec<String>,
    structured: Vec<ExerciseAnalysis>,
    combined: Option<ExerciseAnalysis>,
    pub(crate) stats: AnalysisStats,
}

impl PipelineState {
    /// Start a run. An empty image list is rejected before anything else
    /// happens.
    pub fn new(images: Vec<ImageRef>, session_id: impl Into<String>) -> Result<Self, AnalysisError> {
        if images.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let stats = AnalysisStats {
            total_images: images.len(),
            ..Default::default()
        };
        Ok(Self {
            session_id: session_id.into(),
            images,
            encoded: Vec::new(),
            cursor: 0,
            raw_analyses: Vec::new(),
            structured: Vec::new(),
            combined: None,
            stats,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    /// The references as they will appear in `MathExercise::image_paths`.
    pub fn image_labels(&self) -> Vec<String> {
        self.images.iter().map(ImageRef::label).collect()
    }

    pub fn total(&self) -> usize {
        self.images.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 1-based page number of the cursor.
    pub fn page(&self) -> usize {
        self.cursor + 1
    }

    pub fn encoded(&self) -> &[EncodedImage] {
        &self.encoded
    }

    pub fn raw_analyses(&self) -> &[String] {
        &self.raw_analyses
    }

    pub fn structured(&self) -> &[ExerciseAnalysis] {
        &self.structured
    }

    pub fn combined(&self) -> Option<&ExerciseAnalysis> {
        self.combined.as_ref()
    }

    pub(crate) fn set_encoded(&mut self, encoded: Vec<EncodedImage>) -> Result<(), AnalysisError> {
        if !self.encoded.is_empty() || encoded.len() != self.images.len() {
            return Err(AnalysisError::Validation(format!(
                "loader produced {} payloads for {} images",
                encoded.len(),
                self.images.len()
            )));
        }
        self.encoded = encoded;
        Ok(())
    }

    pub(crate) fn current_image(&self) -> Result<&EncodedImage, AnalysisError> {
        self.encoded.get(self.cursor).ok_or_else(|| {
            AnalysisError::Validation(format!("no encoded payload for image {}", self.page()))
        })
    }

    pub(crate) fn push_raw(&mut self, text: String) -> Result<(), AnalysisError> {
        if self.raw_analyses.len() != self.cursor {
            return Err(AnalysisError::Validation(format!(
                "raw analysis for image {} out of order",
                self.page()
            )));
        }
        self.raw_analyses.push(text);
        Ok(())
    }

    pub(crate) fn current_raw(&self) -> Result<&str, AnalysisError> {
        self.raw_analyses
            .get(self.cursor)
            .map(String::as_str)
            .ok_or_else(|| {
                AnalysisError::Validation(format!("no raw analysis for image {}", self.page()))
            })
    }

    pub(crate) fn push_structured(&mut self, record: ExerciseAnalysis) -> Result<(), AnalysisError> {
        if self.structured.len() != self.cursor || self.raw_analyses.len() != self.cursor + 1 {
            return Err(AnalysisError::Validation(format!(
                "structured record for image {} out of order",
                self.page()
            )));
        }
        self.structured.push(record);
        Ok(())
    }

    /// Move the cursor to `next`, which must be the following page.
    pub(crate) fn advance(&mut self, next: usize) -> Result<(), AnalysisError> {
        if next != self.cursor + 1 || next >= self.images.len() {
            return Err(AnalysisError::Validation(format!(
                "cannot move from image {} to image {}",
                self.page(),
                next + 1
            )));
        }
        self.cursor = next;
        Ok(())
    }

    pub(crate) fn set_combined(&mut self, combined: ExerciseAnalysis) -> Result<(), AnalysisError> {
        if self.cursor + 1 != self.images.len() || self.structured.len() != self.images.len() {
            return Err(AnalysisError::Validation(
                "combine requested before every image was structured".into(),
            ));
        }
        self.combined = Some(combined);
        Ok(())
    }

    pub(crate) fn into_output(self, exercise: MathExercise) -> Result<AnalysisOutput, AnalysisError> {
        let combined = self
            .combined
            .ok_or_else(|| AnalysisError::Validation("no combined analysis".into()))?;
        Ok(AnalysisOutput {
            session_id: self.session_id,
            exercise,
            raw_analyses: self.raw_analyses,
            pages: self.structured,
            combined,
            stats: self.stats,
        })
    }
}
