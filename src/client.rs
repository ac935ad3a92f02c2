//! Model-client seam: one trait, one production adapter.
//!
//! The orchestration layer never talks to a provider SDK directly. It sees
//! [`ModelClient`]: one network round trip in, raw text or a
//! [`ClientError`] out. The production implementation,
//! [`EdgequakeClient`], adapts the `edgequake-llm` provider abstraction;
//! tests substitute scripted mocks.
//!
//! The client is an explicitly constructed, caller-owned object with an
//! explicit lifecycle — constructed once, passed by reference into the
//! orchestration call — never a lazily initialised module global.

use crate::error::RxplainError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A canonical, transport-ready image: base64 body plus mime type.
///
/// Produced by the image normalizer; independent of any provider SDK so
/// mock clients in tests need no real image handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Base64-encoded image bytes.
    pub data: String,
    /// e.g. "image/jpeg".
    pub mime_type: String,
}

/// Generation parameters sent with every attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: usize,
}

/// One request to one named model.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    /// Provider-side model identifier.
    pub model: &'a str,
    /// Instruction prompt (schema contract, translation rules).
    pub system_prompt: &'a str,
    /// User-turn text; empty for vision requests where the image carries
    /// the content, the OCR extraction for text requests.
    pub user_text: &'a str,
    pub image: Option<&'a ImagePayload>,
    pub params: &'a GenerationParams,
}

/// A failed round trip, in the rawest form the transport can report.
///
/// Classification into [`crate::error::ErrorKind`] happens at the invoker
/// boundary — this type deliberately carries provider-shaped data
/// (status code when the transport exposes one, free-form message
/// otherwise) so the classifier is the only place that interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub status: Option<u16>,
    pub message: String,
}

impl ClientError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A transport-level error with no HTTP status.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One network round trip against one named model.
///
/// Implementations perform exactly one call per `generate` invocation: no
/// internal retries, no fallback. Retry and failover decisions belong to
/// the failover controller, which depends on seeing each attempt's error
/// individually.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ClientError>;
}

/// Production [`ModelClient`] backed by `edgequake-llm` providers.
///
/// `edgequake-llm` binds a provider instance to a single model at
/// construction, so the adapter memoises one provider per model id as the
/// failover chain walks its candidates. The cache only ever holds a
/// handful of entries (the configured chains).
pub struct EdgequakeClient {
    provider_name: String,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl EdgequakeClient {
    /// Construct a client for a named provider ("gemini", "openai", …).
    /// The provider's API key is read from the environment by
    /// `edgequake-llm` on first use of each model.
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ClientError> {
        let mut cache = self
            .providers
            .lock()
            .map_err(|_| ClientError::message("provider cache poisoned"))?;

        if let Some(provider) = cache.get(model) {
            return Ok(Arc::clone(provider));
        }

        let provider = ProviderFactory::create_llm_provider(&self.provider_name, model)
            .map_err(|e| ClientError::message(format!("{e}")))?;
        cache.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

#[async_trait]
impl ModelClient for EdgequakeClient {
    async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ClientError> {
        let provider = self.provider_for(request.model)?;

        let mut messages = vec![ChatMessage::system(request.system_prompt)];
        match request.image {
            Some(image) => {
                // Providers require at least one user turn; the image
                // carries the actual content.
                let data = ImageData::new(image.data.clone(), image.mime_type.as_str())
                    .with_detail("high");
                messages.push(ChatMessage::user_with_images(request.user_text, vec![data]));
            }
            None => messages.push(ChatMessage::user(request.user_text)),
        }

        let options = CompletionOptions {
            temperature: Some(request.params.temperature),
            max_tokens: Some(request.params.max_output_tokens),
            ..Default::default()
        };

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ClientError::message(format!("{e}")))?;

        debug!(
            model = request.model,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "model call completed"
        );

        Ok(response.content)
    }
}

/// Resolve the model client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.client`) — the caller constructed and
///    configured it entirely; useful in tests or when custom middleware
///    (caching, rate-limiting) wraps the transport.
/// 2. **Named provider** (`config.provider_name`) — the corresponding API
///    key is read from the environment by `edgequake-llm`.
/// 3. **Environment auto-detection** — the first present provider key
///    selects its provider. Gemini keys are checked first because the
///    default model chains are Gemini model ids; per-model provider
///    construction in the failover chain rules out the factory's own
///    fixed-model `from_env` detection here.
pub fn resolve_client(
    config: &crate::config::PipelineConfig,
) -> Result<Arc<dyn ModelClient>, RxplainError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    if let Some(ref name) = config.provider_name {
        return Ok(Arc::new(EdgequakeClient::new(name.clone())));
    }

    for (var, provider) in [
        ("GOOGLE_API_KEY", "gemini"),
        ("GEMINI_API_KEY", "gemini"),
        ("OPENAI_API_KEY", "openai"),
        ("ANTHROPIC_API_KEY", "anthropic"),
    ] {
        if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
            return Ok(Arc::new(EdgequakeClient::new(provider)));
        }
    }

    Err(RxplainError::ClientNotConfigured {
        provider: "auto".into(),
        hint: "No model provider could be auto-detected from the environment.\n\
               Set GOOGLE_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY, or name a\n\
               provider explicitly via PipelineConfigBuilder::provider_name."
            .into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_display_with_status() {
        let e = ClientError::new(Some(429), "quota exceeded");
        assert_eq!(e.to_string(), "[429] quota exceeded");
    }

    #[test]
    fn client_error_display_without_status() {
        let e = ClientError::message("connection reset");
        assert_eq!(e.to_string(), "connection reset");
    }
}
