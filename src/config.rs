//! Configuration types for exercise analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built
//! via its [`AnalysisConfigBuilder`]. One config is shared by every request
//! an analyzer serves; nothing in it is mutated per request.

use crate::error::AnalysisError;
use crate::pipeline::backend::ModelBackend;
use crate::pipeline::input::ImageSource;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default model. Handwriting needs a strong vision model; the cheap nano
/// tiers misread indices and exponents.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for an exercise analysis.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use mathscribe::{AnalysisConfig, ConfidencePolicy};
///
/// let config = AnalysisConfig::builder()
///     .model("gpt-4o")
///     .confidence_policy(ConfidencePolicy::Minimum)
///     .api_timeout_secs(120)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed backend. Takes precedence over every provider setting.
    pub backend: Option<Arc<dyn ModelBackend>>,

    /// Where image bytes come from. Default: local files and HTTP(S) URLs.
    pub image_source: Option<Arc<dyn ImageSource>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Transcription must be faithful to the page; any creativity shows up
    /// as invented steps in the solution.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Per-model-call timeout in seconds. Default: 90.
    ///
    /// A timed-out call fails the request; the pipeline does not retry.
    pub api_timeout_secs: u64,

    /// Download timeout for URL image references in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Largest accepted image, in bytes. Default: 20 MiB (the common
    /// vision-API upload limit).
    pub max_image_bytes: usize,

    /// Custom system prompt for the vision stage. If None, uses
    /// [`crate::prompts::ANALYSIS_SYSTEM_PROMPT`].
    pub analysis_prompt: Option<String>,

    /// How page confidences combine for multi-page exercises. Default: Mean.
    pub confidence_policy: ConfidencePolicy,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            image_source: None,
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 90,
            download_timeout_secs: 60,
            max_image_bytes: 20 * 1024 * 1024,
            analysis_prompt: None,
            confidence_policy: ConfidencePolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("image_source", &self.image_source.as_ref().map(|_| "<dyn ImageSource>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("confidence_policy", &self.confidence_policy)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model name in effect.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl fmt::Debug for AnalysisConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl AnalysisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn image_source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.config.image_source = Some(source);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_image_bytes(mut self, bytes: usize) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn analysis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.analysis_prompt = Some(prompt.into());
        self
    }

    pub fn confidence_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.config.confidence_policy = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(AnalysisError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_image_bytes == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_image_bytes must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the per-page confidence scores of a multi-page exercise are folded
/// into the exercise confidence.
///
/// Pages without a score count as `0.0`. The result is always in `[0, 1]`
/// and depends only on the scores, so repeated runs over the same pages
/// agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidencePolicy {
    /// Arithmetic mean of the page scores. (default)
    #[default]
    Mean,
    /// The weakest page decides.
    Minimum,
}

impl ConfidencePolicy {
    pub fn aggregate(&self, scores: &[Option<f64>]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let values = scores.iter().map(|s| s.unwrap_or(0.0).clamp(0.0, 1.0));
        let result = match self {
            ConfidencePolicy::Mean => values.sum::<f64>() / scores.len() as f64,
            ConfidencePolicy::Minimum => values.fold(1.0, f64::min),
        };
        result.clamp(0.0, 1.0)
    }
}
