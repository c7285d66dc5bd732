//! The language-model backend capability.
//!
//! Stages never talk to a provider directly; they build a [`ModelRequest`]
//! and hand it to a [`ModelBackend`]. The production implementation,
//! [`EdgequakeBackend`], forwards to any `edgequake_llm` provider (OpenAI,
//! Anthropic, Gemini, Ollama, ...). Tests and callers with custom routing
//! (caching, rate limiting, a self-hosted model) implement the trait
//! themselves and inject it via [`crate::config::AnalysisConfigBuilder::backend`].
//!
//! A backend is shared by every concurrent request and must hold no
//! per-request state. The session id on each request is a tracing token
//! only.

use crate::error::BackendError;
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::parse::extract_json;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The pipeline stage issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Structure,
    Combine,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Analyze => "analyze",
            Stage::Structure => "structure",
            Stage::Combine => "combine",
        })
    }
}

/// One call to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub stage: Stage,
    /// 1-based page for per-page stages, `None` for the merge.
    pub page: Option<usize>,
    pub system: String,
    pub user: String,
    pub image: Option<EncodedImage>,
    pub session_id: String,
}

/// Generated text plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short name for logs (e.g. `"openai/gpt-4o"`).
    fn name(&self) -> &str;

    /// Generate free text for `request`.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, BackendError>;

    /// Generate and require a JSON object in the reply.
    ///
    /// The default implementation extracts the object from the text reply;
    /// backends with a native JSON mode may override it.
    async fn generate_json(
        &self,
        request: &ModelRequest,
    ) -> Result<(Value, ModelReply), BackendError> {
        let reply = self.generate(request).await?;
        let value = extract_json(&reply.content).map_err(BackendError::MalformedOutput)?;
        Ok((value, reply))
    }
}

/// [`ModelBackend`] over an `edgequake_llm` provider.
pub struct EdgequakeBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
    temperature: f32,
    max_tokens: usize,
}

impl EdgequakeBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            temperature,
            max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl fmt::Debug for EdgequakeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgequakeBackend")
            .field("name", &self.name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// `detail: "high"` keeps small handwriting (indices, exponents) legible to
/// tiling vision models.
fn to_image_data(image: &EncodedImage) -> ImageData {
    ImageData::new(image.data.clone(), image.mime_type.as_str()).with_detail("high")
}

/// Message layout: system instruction, then one user turn carrying the text
/// and, for the vision stage, the page image.
fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(request.system.as_str())];
    match &request.image {
        Some(image) => messages.push(ChatMessage::user_with_images(
            request.user.as_str(),
            vec![to_image_data(image)],
        )),
        None => messages.push(ChatMessage::user(request.user.as_str())),
    }
    messages
}

#[async_trait]
impl ModelBackend for EdgequakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
        let messages = build_messages(request);
        let options = self.options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        debug!(
            session = %request.session_id,
            stage = %request.stage,
            page = ?request.page,
            "{} input tokens, {} output tokens",
            response.prompt_tokens,
            response.completion_tokens
        );

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}
