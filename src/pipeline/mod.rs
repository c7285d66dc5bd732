//! Pipeline stages for handwritten-exercise analysis.
//!
//! Each submodule implements one concern; [`stages`] strings them together
//! over a request-scoped [`state::PipelineState`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ analyze(i) ──▶ structure(i) ──▶ route ──▶ combine ──▶ validate
//! (bytes)   (base64)   (vision VLM)   (JSON schema)     │  ▲      (merge)    (defaults)
//!                                                      └──┘ next page
//! ```
//!
//! 1. [`input`]   — resolve each image reference to bytes (file, URL, memory)
//! 2. [`encode`]  — sniff the format, validate, base64-wrap
//! 3. [`backend`] — the model capability every stage calls through
//! 4. [`parse`]   — pull typed records out of model replies
//! 5. [`state`]   — per-request state and the page router
//! 6. [`stages`]  — loader, analyzer, structurer, combiner, validator

pub mod backend;
pub mod encode;
pub mod input;
pub mod parse;
pub mod stages;
pub mod state;
