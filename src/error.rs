//! Error types for the mathscribe library.
//!
//! Two error types reflect two layers:
//!
//! * [`AnalysisError`] — **Fatal** for one request: the pipeline stopped at
//!   the first failing stage and produced no exercise. Returned as
//!   `Err(AnalysisError)` from every `analyze*` entry point. The first error
//!   wins; later stages never run.
//!
//! * [`BackendError`] — the failure of a single model-backend call. Stages
//!   translate it into their own [`AnalysisError`] kind so callers always see
//!   *where* the pipeline stopped (load, analysis of page N, structuring of
//!   page N, merge).
//!
//! Callers that need to branch on the failure (e.g. map to an HTTP status)
//! should match on [`AnalysisError::kind`] rather than on display strings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mathscribe pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// `analyze` was called with no image references.
    #[error("At least one image must be provided")]
    EmptyInput,

    /// An image could not be read, downloaded or recognised.
    ///
    /// `index` is 1-based, matching the page numbering used everywhere else.
    #[error("Failed to load image {index} ('{reference}'): {detail}")]
    Load {
        index: usize,
        reference: String,
        detail: String,
    },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The vision call for one page failed (transport, backend, timeout).
    #[error("Failed to analyze image {page}: {detail}")]
    ModelCall { page: usize, detail: String },

    /// The model output for one page did not match the page schema.
    #[error("Failed to structure analysis for image {page}: {detail}")]
    Structure { page: usize, detail: String },

    /// The multi-page merge call failed or returned unparseable output.
    #[error("Failed to combine analyses: {detail}")]
    Combine { detail: String },

    /// An internal invariant was violated while building the final record.
    #[error("Failed to validate results: {0}")]
    Validation(String),

    /// The caller cancelled the request or its deadline passed.
    #[error("Analysis cancelled during {stage}")]
    Cancelled { stage: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Load,
    ModelCall,
    Structure,
    Combine,
    Validation,
    Cancelled,
    Configuration,
    Io,
    /// A bug or environment failure outside the pipeline's stages.
    Internal,
}

impl AnalysisError {
    /// The error kind, for callers translating failures to their own
    /// representation (HTTP status, exit code, ...).
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::EmptyInput => ErrorKind::InvalidInput,
            AnalysisError::Load { .. } => ErrorKind::Load,
            AnalysisError::ModelCall { .. } => ErrorKind::ModelCall,
            AnalysisError::Structure { .. } => ErrorKind::Structure,
            AnalysisError::Combine { .. } => ErrorKind::Combine,
            AnalysisError::Validation(_) => ErrorKind::Validation,
            AnalysisError::Cancelled { .. } => ErrorKind::Cancelled,
            AnalysisError::ProviderNotConfigured { .. } | AnalysisError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            AnalysisError::OutputWriteFailed { .. } => ErrorKind::Io,
            AnalysisError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The 1-based image index the error refers to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            AnalysisError::Load { index, .. } => Some(*index),
            AnalysisError::ModelCall { page, .. } | AnalysisError::Structure { page, .. } => {
                Some(*page)
            }
            _ => None,
        }
    }
}

/// Failure of a single call to the language-model backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network, HTTP or provider-side failure.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The call did not complete within the per-call timeout.
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The call succeeded but the output does not conform to the
    /// requested schema.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

/// Failure of the image source to produce bytes for one reference.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageLoadError {
    #[error("file not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("unreadable: {0}")]
    Unreadable(String),

    #[error("download failed: {reason}")]
    DownloadFailed { reason: String },

    #[error("download timed out after {secs}s")]
    DownloadTimeout { secs: u64 },
}
