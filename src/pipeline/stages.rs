//! The pipeline stages.
//!
//! Each stage reads what earlier stages left in the [`PipelineState`],
//! makes at most one backend call, and appends its own result. A stage that
//! fails returns its typed [`AnalysisError`] and leaves the state untouched.
//! No stage retries.

use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, BackendError};
use crate::output::{ExerciseAnalysis, MathExercise};
use crate::pipeline::backend::{ModelBackend, ModelReply, ModelRequest, Stage};
use crate::pipeline::encode::encode_image;
use crate::pipeline::input::ImageSource;
use crate::pipeline::parse::{merged_from_value, page_from_value};
use crate::pipeline::state::PipelineState;
use crate::prompts;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sentinel for textual fields the model never produced.
pub const UNKNOWN: &str = "Unknown";

/// Shared, read-only collaborators of one request.
pub struct StageContext<'a> {
    pub backend: &'a dyn ModelBackend,
    pub source: &'a dyn ImageSource,
    pub config: &'a AnalysisConfig,
    pub cancel: &'a CancelToken,
}

impl StageContext<'_> {
    /// Run one backend call under the cancel token and the per-call timeout.
    ///
    /// The outer `Err` is a cancellation; the inner result is the call's own.
    async fn guarded<T>(
        &self,
        what: String,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<Result<T, BackendError>, AnalysisError> {
        let secs = self.config.api_timeout_secs;
        let res = self
            .unless_cancelled(what, tokio::time::timeout(Duration::from_secs(secs), call))
            .await?;
        Ok(res.unwrap_or(Err(BackendError::Timeout { secs })))
    }

    /// Run `work` unless the token fires first.
    async fn unless_cancelled<T>(
        &self,
        what: String,
        work: impl Future<Output = T>,
    ) -> Result<T, AnalysisError> {
        if self.cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled { stage: what });
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AnalysisError::Cancelled { stage: what }),
            out = work => Ok(out),
        }
    }

    fn request(&self, state: &PipelineState, stage: Stage, page: Option<usize>) -> ModelRequest {
        ModelRequest {
            stage,
            page,
            system: String::new(),
            user: String::new(),
            image: None,
            session_id: state.session_id().to_string(),
        }
    }
}

fn record_usage(state: &mut PipelineState, reply: &ModelReply, started: Instant) {
    state.stats.model_calls += 1;
    state.stats.total_input_tokens += reply.input_tokens;
    state.stats.total_output_tokens += reply.output_tokens;
    state.stats.llm_duration_ms += started.elapsed().as_millis() as u64;
}

// ── Loader ───────────────────────────────────────────────────────────────

/// Fetch and encode every image, in order. All-or-nothing: the first bad
/// image fails the stage and nothing is stored.
pub async fn load(ctx: &StageContext<'_>, state: &mut PipelineState) -> Result<(), AnalysisError> {
    let started = Instant::now();
    let mut encoded = Vec::with_capacity(state.total());

    for (i, image) in state.images().iter().enumerate() {
        let load_err = |detail: String| AnalysisError::Load {
            index: i + 1,
            reference: image.label(),
            detail,
        };
        let bytes = ctx
            .unless_cancelled(format!("loading of image {}", i + 1), ctx.source.fetch(image))
            .await?
            .map_err(|e| load_err(e.to_string()))?;
        let payload =
            encode_image(&bytes, ctx.config.max_image_bytes).map_err(|e| load_err(e.to_string()))?;
        encoded.push(payload);
    }

    state.set_encoded(encoded)?;
    state.stats.load_duration_ms = started.elapsed().as_millis() as u64;
    info!("Loaded {} images in {}ms", state.total(), state.stats.load_duration_ms);
    Ok(())
}

// ── Analyzer ─────────────────────────────────────────────────────────────

/// Vision call for the page under the cursor; appends the free-text reply.
pub async fn analyze_page(
    ctx: &StageContext<'_>,
    state: &mut PipelineState,
) -> Result<(), AnalysisError> {
    let page = state.page();
    let total = state.total();

    let mut request = ctx.request(state, Stage::Analyze, Some(page));
    request.system = ctx
        .config
        .analysis_prompt
        .clone()
        .unwrap_or_else(|| prompts::ANALYSIS_SYSTEM_PROMPT.to_string());
    request.user = prompts::analysis_user_prompt(page, total);
    request.image = Some(state.current_image()?.clone());

    let started = Instant::now();
    let reply = ctx
        .guarded(
            format!("analysis of image {page}"),
            ctx.backend.generate(&request),
        )
        .await?
        .map_err(|e| AnalysisError::ModelCall {
            page,
            detail: e.to_string(),
        })?;

    if reply.content.trim().is_empty() {
        return Err(AnalysisError::ModelCall {
            page,
            detail: "model returned an empty analysis".into(),
        });
    }

    debug!("Page {}/{}: {} chars of analysis", page, total, reply.content.len());
    record_usage(state, &reply, started);
    state.push_raw(reply.content)
}

// ── Structurer ───────────────────────────────────────────────────────────

/// Turn the page's free-text analysis into a schema-checked record.
pub async fn structure_page(
    ctx: &StageContext<'_>,
    state: &mut PipelineState,
) -> Result<(), AnalysisError> {
    let page = state.page();

    let mut request = ctx.request(state, Stage::Structure, Some(page));
    request.system = prompts::STRUCTURE_SYSTEM_PROMPT.to_string();
    request.user = prompts::structure_user_prompt(state.current_raw()?);

    let structure_err = |detail: String| AnalysisError::Structure { page, detail };

    let started = Instant::now();
    let (value, reply) = ctx
        .guarded(
            format!("structuring of image {page}"),
            ctx.backend.generate_json(&request),
        )
        .await?
        .map_err(|e| structure_err(e.to_string()))?;
    record_usage(state, &reply, started);

    let record = page_from_value(value).map_err(structure_err)?;
    debug!(
        "Page {}: domain={:?} confidence={:?} continuation={}",
        page, record.domain, record.confidence_score, record.is_continuation
    );
    state.push_structured(record)
}

// ── Combiner ─────────────────────────────────────────────────────────────

/// Merge the page records into one.
///
/// One page passes through unchanged with no model call. Several pages go
/// to the model once, then the gaps it leaves are filled from the pages and
/// the confidence is recomputed with the configured policy.
pub async fn combine(ctx: &StageContext<'_>, state: &mut PipelineState) -> Result<(), AnalysisError> {
    if state.structured().len() == 1 {
        let only = state.structured()[0].clone();
        return state.set_combined(only);
    }

    let pages_json = state
        .structured()
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AnalysisError::Internal(format!("serialising page records: {e}")))?;

    let mut request = ctx.request(state, Stage::Combine, None);
    request.system = prompts::COMBINE_SYSTEM_PROMPT.to_string();
    request.user = prompts::combine_user_prompt(&pages_json);

    let combine_err = |detail: String| AnalysisError::Combine { detail };

    let started = Instant::now();
    let (value, reply) = ctx
        .guarded("combining analyses".to_string(), ctx.backend.generate_json(&request))
        .await?
        .map_err(|e| combine_err(e.to_string()))?;
    record_usage(state, &reply, started);

    let merged = merged_from_value(value).map_err(combine_err)?;
    let combined = complete_merge(merged, state.structured(), ctx.config);
    info!(
        "Combined {} pages, confidence {:.2}",
        state.total(),
        combined.confidence_score.unwrap_or(0.0)
    );
    state.set_combined(combined)
}

/// Deterministic completion of a model-merged record.
///
/// * confidence: the configured policy over the page scores (the model's
///   own score is never used);
/// * statement: page 1's when the model gave none;
/// * response: page responses joined in order when the model gave none;
/// * domain/level: from the most confident page (earliest on ties);
/// * title: first page title present.
pub fn complete_merge(
    mut merged: ExerciseAnalysis,
    pages: &[ExerciseAnalysis],
    config: &AnalysisConfig,
) -> ExerciseAnalysis {
    let scores: Vec<Option<f64>> = pages.iter().map(|p| p.confidence_score).collect();
    merged.confidence_score = Some(config.confidence_policy.aggregate(&scores));

    if merged.statement.is_none() {
        merged.statement = pages.first().and_then(|p| p.statement.clone());
    }
    if merged.response.is_none() {
        let parts: Vec<&str> = pages
            .iter()
            .filter_map(|p| p.response.as_deref())
            .filter(|r| !r.trim().is_empty())
            .collect();
        if !parts.is_empty() {
            merged.response = Some(parts.join("\n\n"));
        }
    }

    let best = most_confident(pages);
    if merged.domain.is_none() {
        merged.domain = best.and_then(|p| p.domain.clone());
    }
    if merged.level.is_none() {
        merged.level = best.and_then(|p| p.level.clone());
    }
    if merged.title.is_none() {
        merged.title = pages.iter().find_map(|p| p.title.clone());
    }
    merged.is_continuation = false;
    merged
}

fn most_confident(pages: &[ExerciseAnalysis]) -> Option<&ExerciseAnalysis> {
    let mut best: Option<&ExerciseAnalysis> = None;
    for page in pages {
        let score = page.confidence_score.unwrap_or(0.0);
        match best {
            Some(b) if b.confidence_score.unwrap_or(0.0) >= score => {}
            _ => best = Some(page),
        }
    }
    best
}

// ── Validator ────────────────────────────────────────────────────────────

/// Complete and freeze the combined record.
///
/// Missing (or blank) `title` becomes `"<domain> Exercise"`, missing
/// `confidenceScore` becomes `0.0`, any other missing text becomes
/// [`UNKNOWN`]. Pure: the same input always yields the same exercise.
pub fn validate(
    combined: Option<&ExerciseAnalysis>,
    image_paths: &[String],
) -> Result<MathExercise, AnalysisError> {
    let combined = combined.ok_or_else(|| {
        AnalysisError::Validation("no combined analysis to validate".into())
    })?;

    let text = |field: &Option<String>, name: &str| match field.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            warn!("Combined analysis has no {name}; using \"{UNKNOWN}\"");
            UNKNOWN.to_string()
        }
    };

    let domain = text(&combined.domain, "domain");
    let title = match combined.title.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("{domain} Exercise"),
    };
    let confidence_score = match combined.confidence_score {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    };

    Ok(MathExercise {
        title,
        statement: text(&combined.statement, "statement"),
        response: text(&combined.response, "response"),
        domain,
        level: text(&combined.level, "level"),
        confidence_score,
        image_paths: image_paths.to_vec(),
    })
}
