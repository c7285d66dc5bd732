//! # mathscribe
//!
//! Turn photographs of handwritten math exercises into structured records
//! using Vision Language Models (VLMs).
//!
//! An exercise may span several photographed pages. Each page is read by a
//! vision model, the free-text reading is structured into a typed record,
//! and the records are merged into one [`MathExercise`] with a statement,
//! the student's response, a domain, an education level, and a confidence
//! score.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images (paths, URLs, bytes)
//!  │
//!  ├─ 1. Load       fetch every image, sniff format, base64-encode (all-or-nothing)
//!  ├─ 2. Analyze    one vision call per page, in page order
//!  ├─ 3. Structure  one JSON call per page → ExerciseAnalysis
//!  ├─ 4. Route      next page, or combine once the last page is done
//!  ├─ 5. Combine    pass-through for one page, one merge call for several
//!  └─ 6. Validate   fill defaults → MathExercise
//! ```
//!
//! The first failing stage ends the request with a typed [`AnalysisError`];
//! later stages never run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mathscribe::{AnalysisConfig, ImageRef, MathExerciseAnalyzer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let analyzer = MathExerciseAnalyzer::new(AnalysisConfig::default())?;
//!     let pages = [ImageRef::parse("page1.jpg"), ImageRef::parse("page2.jpg")];
//!     let exercise = analyzer.analyze(&pages, None).await?;
//!     println!("{} ({}, {})", exercise.title, exercise.domain, exercise.level);
//!     println!("confidence: {:.2}", exercise.confidence_score);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mathscribe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mathscribe = { version = "0.1", default-features = false }
//! ```
//!
//! ## Testing without a provider
//!
//! Every model call goes through the [`ModelBackend`] trait. Supply your own
//! implementation with [`AnalysisConfigBuilder::backend`] or
//! [`MathExerciseAnalyzer::with_backend`] to run the pipeline offline.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod cancel;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_sync, write_json, AnalysisRequest, MathExerciseAnalyzer};
pub use cancel::CancelToken;
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ConfidencePolicy, DEFAULT_MODEL};
pub use error::{AnalysisError, BackendError, ErrorKind, ImageLoadError};
pub use output::{AnalysisOutput, AnalysisStats, ExerciseAnalysis, MathExercise};
pub use pipeline::backend::{EdgequakeBackend, ModelBackend, ModelReply, ModelRequest, Stage};
pub use pipeline::encode::EncodedImage;
pub use pipeline::input::{FsImageSource, ImageRef, ImageSource};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
