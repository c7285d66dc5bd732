//! Progress-callback trait for per-stage analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks through the pages of an exercise.
//!
//! # Example
//!
//! ```rust
//! use mathscribe::{AnalysisProgressCallback, AnalysisConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, _confidence: Option<f64>) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} structured", page_num, total_pages);
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes an exercise.
///
/// Pages of one request are handled strictly in order, but batch analysis
/// runs several requests at once, so implementations must be `Send + Sync`
/// and protect any shared mutable state. All methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once the images are loaded, before the first model call.
    fn on_analysis_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the vision request for a page (1-indexed).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after a page has been analysed and structured.
    ///
    /// `confidence` is the page's reported confidence, if any.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, confidence: Option<f64>) {
        let _ = (page_num, total_pages, confidence);
    }

    /// Called before the merge call; only fires for multi-page exercises.
    fn on_combine_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once when the pipeline stops on an error.
    fn on_analysis_error(&self, error: &str) {
        let _ = error;
    }

    /// Called once with the final exercise confidence on success.
    fn on_analysis_complete(&self, confidence: f64) {
        let _ = confidence;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
