//! Records produced by the analysis pipeline.
//!
//! * [`ExerciseAnalysis`] — one structured record, either for a single page
//!   (from the structuring stage) or for the whole exercise (from the merge).
//! * [`MathExercise`] — the validated, complete record handed to the caller.
//! * [`AnalysisOutput`] — the exercise plus every intermediate artefact and
//!   usage statistics, for callers that want to audit a run.

use serde::{Deserialize, Serialize};

/// A structured extraction of one page, or of a merged exercise.
///
/// Per-page records always carry `statement`, `response`, `domain` and
/// `level` (the structuring stage rejects output without them); `title` and
/// `confidence_score` may be absent. A merged record may lack any field —
/// the validator fills the gaps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseAnalysis {
    pub title: Option<String>,
    pub statement: Option<String>,
    pub response: Option<String>,
    pub domain: Option<String>,
    pub level: Option<String>,
    /// Model-reported certainty in `[0, 1]`.
    pub confidence_score: Option<f64>,
    /// This page continues the previous page's exercise.
    pub is_continuation: bool,
}

/// The final exercise record.
///
/// Constructed once by the validator and immutable afterwards; persisting
/// it is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathExercise {
    pub title: String,
    pub statement: String,
    /// The worked solution.
    pub response: String,
    /// Subject area (Algebra, Calculus, ...).
    pub domain: String,
    /// Difficulty level.
    pub level: String,
    pub confidence_score: f64,
    /// The input references, verbatim and in input order.
    pub image_paths: Vec<String>,
}

/// Full result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    /// Correlation id of the run (caller-supplied or generated).
    pub session_id: String,
    pub exercise: MathExercise,
    /// Free-text analysis per page, in page order.
    pub raw_analyses: Vec<String>,
    /// Structured record per page, in page order.
    pub pages: Vec<ExerciseAnalysis>,
    /// The record the validator received.
    pub combined: ExerciseAnalysis,
    pub stats: AnalysisStats,
}

/// Usage statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub total_images: usize,
    /// Number of backend calls issued (2 per page, +1 for a multi-page merge).
    pub model_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub load_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}
