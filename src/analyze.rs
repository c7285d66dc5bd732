//! Analysis entry points.
//!
//! [`MathExerciseAnalyzer`] owns the shared, read-only collaborators (model
//! backend, image source, config) and drives one [`PipelineState`] per
//! request:
//!
//! ```text
//! load ─▶ analyze(1) ─▶ structure(1) ─▶ … ─▶ analyze(n) ─▶ structure(n) ─▶ combine ─▶ validate
//! ```
//!
//! An analyzer is cheap to share behind an `Arc` and can serve many
//! requests at once; requests never see each other's state.

use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::output::{AnalysisOutput, MathExercise};
use crate::pipeline::backend::{EdgequakeBackend, ModelBackend};
use crate::pipeline::input::{FsImageSource, ImageRef, ImageSource};
use crate::pipeline::stages::{self, StageContext};
use crate::pipeline::state::{route, PipelineState, Route};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// One exercise to analyse: its pages in order, plus an optional
/// correlation id (generated when absent).
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub images: Vec<ImageRef>,
    pub session_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new<I, R>(images: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ImageRef>,
    {
        Self {
            images: images.into_iter().map(Into::into).collect(),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }
}

/// Extracts structured exercises from photographed handwriting.
pub struct MathExerciseAnalyzer {
    backend: Arc<dyn ModelBackend>,
    source: Arc<dyn ImageSource>,
    config: AnalysisConfig,
}

impl std::fmt::Debug for MathExerciseAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MathExerciseAnalyzer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl MathExerciseAnalyzer {
    /// Build an analyzer, resolving the model backend from `config`.
    ///
    /// Fails with [`AnalysisError::ProviderNotConfigured`] when no provider
    /// can be found.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let backend = resolve_backend(&config)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Build an analyzer around an explicit backend.
    pub fn with_backend(backend: Arc<dyn ModelBackend>, config: AnalysisConfig) -> Self {
        let source = config
            .image_source
            .clone()
            .unwrap_or_else(|| Arc::new(FsImageSource::new(config.download_timeout_secs)));
        Self {
            backend,
            source,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse the ordered pages of one exercise.
    pub async fn analyze(
        &self,
        images: &[ImageRef],
        session_id: Option<&str>,
    ) -> Result<MathExercise, AnalysisError> {
        let request = AnalysisRequest {
            images: images.to_vec(),
            session_id: session_id.map(str::to_string),
        };
        self.analyze_detailed(request, &CancelToken::new())
            .await
            .map(|out| out.exercise)
    }

    /// Single-page convenience: exactly `analyze(&[image], session_id)`.
    pub async fn analyze_single(
        &self,
        image: ImageRef,
        session_id: Option<&str>,
    ) -> Result<MathExercise, AnalysisError> {
        self.analyze(std::slice::from_ref(&image), session_id).await
    }

    /// Analyse one exercise and return every intermediate record and usage
    /// statistics along with the exercise.
    ///
    /// `cancel` is checked before and raced against every model call.
    pub async fn analyze_detailed(
        &self,
        request: AnalysisRequest,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("analyze", session = %session_id, images = request.images.len());
        self.run(request.images, session_id, cancel)
            .instrument(span)
            .await
    }

    /// Analyse independent exercises concurrently, at most `concurrency` at
    /// a time. Results come back in request order.
    pub async fn analyze_batch(
        &self,
        requests: Vec<AnalysisRequest>,
        concurrency: usize,
        cancel: &CancelToken,
    ) -> Vec<Result<MathExercise, AnalysisError>> {
        info!("Analysing {} exercises, concurrency {}", requests.len(), concurrency);
        stream::iter(requests.into_iter().map(|request| async move {
            self.analyze_detailed(request, cancel)
                .await
                .map(|out| out.exercise)
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await
    }

    /// Analyse an exercise and write it as pretty JSON to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn analyze_to_file(
        &self,
        images: &[ImageRef],
        output_path: impl AsRef<Path>,
    ) -> Result<MathExercise, AnalysisError> {
        let exercise = self.analyze(images, None).await?;
        write_json(&exercise, output_path.as_ref()).await?;
        Ok(exercise)
    }

    async fn run(
        &self,
        images: Vec<ImageRef>,
        session_id: String,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let total_start = Instant::now();
        let mut state = PipelineState::new(images, session_id)?;
        info!("Starting analysis of {} images with {}", state.total(), self.backend.name());

        let ctx = StageContext {
            backend: self.backend.as_ref(),
            source: self.source.as_ref(),
            config: &self.config,
            cancel,
        };

        let exercise = match self.drive(&ctx, &mut state).await {
            Ok(exercise) => exercise,
            Err(e) => {
                warn!("Analysis failed: {}", e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_analysis_error(&e.to_string());
                }
                return Err(e);
            }
        };

        state.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Analysis complete: '{}' ({}), confidence {:.2}, {} model calls, {}ms",
            exercise.title,
            exercise.domain,
            exercise.confidence_score,
            state.stats.model_calls,
            state.stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_analysis_complete(exercise.confidence_score);
        }

        state.into_output(exercise)
    }

    async fn drive(
        &self,
        ctx: &StageContext<'_>,
        state: &mut PipelineState,
    ) -> Result<MathExercise, AnalysisError> {
        let cb = self.config.progress_callback.as_ref();
        let total = state.total();

        // ── Step 1: Load and encode every image ──────────────────────────
        stages::load(ctx, state).await?;
        if let Some(cb) = cb {
            cb.on_analysis_start(total);
        }

        // ── Step 2: Analyse + structure each page, in order ──────────────
        loop {
            let page = state.page();
            if let Some(cb) = cb {
                cb.on_page_start(page, total);
            }
            stages::analyze_page(ctx, state).await?;
            stages::structure_page(ctx, state).await?;
            if let Some(cb) = cb {
                let confidence = state.structured().last().and_then(|r| r.confidence_score);
                cb.on_page_complete(page, total, confidence);
            }

            match route(state.cursor(), total) {
                Route::Analyze(next) => state.advance(next)?,
                Route::Combine => break,
            }
        }

        // ── Step 3: Merge ────────────────────────────────────────────────
        if total > 1 {
            if let Some(cb) = cb {
                cb.on_combine_start(total);
            }
        }
        stages::combine(ctx, state).await?;

        // ── Step 4: Validate ─────────────────────────────────────────────
        stages::validate(state.combined(), &state.image_labels())
    }
}

/// Analyse one exercise with a one-off analyzer built from `config`.
pub async fn analyze(
    images: &[ImageRef],
    config: &AnalysisConfig,
) -> Result<MathExercise, AnalysisError> {
    MathExerciseAnalyzer::new(config.clone())?
        .analyze(images, None)
        .await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    images: &[ImageRef],
    config: &AnalysisConfig,
) -> Result<MathExercise, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(images, config))
}

/// Write `value` as pretty JSON to `path` via a temp file and rename, so
/// readers never see a half-written file. Parent directories are created.
pub async fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), AnalysisError> {
    let write_err = |source: std::io::Error| AnalysisError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AnalysisError::Internal(format!("Failed to serialise output: {e}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AnalysisError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AnalysisError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn wrap(provider: Arc<dyn LLMProvider>, name: String, config: &AnalysisConfig) -> Arc<dyn ModelBackend> {
    Arc::new(EdgequakeBackend::new(
        provider,
        name,
        config.temperature,
        config.max_tokens,
    ))
}

/// Resolve the model backend, from most-specific to least-specific:
///
/// 1. **Pre-built backend** (`config.backend`), used as-is.
/// 2. **Pre-built provider** (`config.provider`).
/// 3. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`OPENAI_API_KEY`** present → OpenAI with the configured model.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_backend(config: &AnalysisConfig) -> Result<Arc<dyn ModelBackend>, AnalysisError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let model = config.model_name();

    if let Some(ref provider) = config.provider {
        return Ok(wrap(Arc::clone(provider), format!("custom/{model}"), config));
    }

    if let Some(ref name) = config.provider_name {
        let provider = create_vision_provider(name, model)?;
        return Ok(wrap(provider, format!("{name}/{model}"), config));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            let provider = create_vision_provider(&prov, &env_model)?;
            return Ok(wrap(provider, format!("{prov}/{env_model}"), config));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let provider = create_vision_provider("openai", model)?;
            return Ok(wrap(provider, format!("openai/{model}"), config));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnalysisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(wrap(llm_provider, "auto".to_string(), config))
}
