//! Configuration types for the prescription-inference pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across requests, serialise them for logging,
//! and diff two runs to understand why their outputs differ.
//!
//! One configuration structure feeds both the vision path and the OCR-text
//! fallback path (ordered model lists + schema version), so the two paths
//! cannot drift apart.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.

use crate::client::ModelClient;
use crate::error::RxplainError;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::PipelineObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Output-schema revision shared by the vision and text prompts.
///
/// Version 1 was the original four-field record (name, dosage, timing,
/// instructions); version 2 is the current ten-field record with glyph
/// timing, generic alternatives, and pairwise interaction checks.
pub const SCHEMA_VERSION: u16 = 2;

/// What a model candidate can accept as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Accepts an image payload (and text).
    Vision,
    /// Accepts text only.
    Text,
}

/// One named upstream inference endpoint in the ordered fallback list.
///
/// Lists are sorted by ascending `priority` at build time and consumed
/// read-only by the failover controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Provider-side model identifier, e.g. "gemini-2.0-flash".
    pub id: String,
    pub modality: Modality,
    /// Lower tries first.
    pub priority: u8,
}

impl ModelCandidate {
    /// A vision-capable candidate.
    pub fn vision(id: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            modality: Modality::Vision,
            priority,
        }
    }

    /// A text-only candidate.
    pub fn text(id: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            modality: Modality::Text,
            priority,
        }
    }
}

/// Default primary (vision) fallback chain.
pub fn default_vision_models() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate::vision("gemini-2.0-flash", 0),
        ModelCandidate::vision("gemini-2.0-flash-lite-001", 1),
        ModelCandidate::vision("gemini-2.0-flash-001", 2),
        ModelCandidate::vision("gemini-2.5-flash", 3),
        ModelCandidate::vision("gemini-2.0-flash-lite", 4),
        ModelCandidate::vision("gemini-flash-latest", 5),
    ]
}

/// Default OCR-fallback (text-only) chain. Deliberately shorter: by the
/// time this runs the request has already burned the primary chain's
/// latency budget.
pub fn default_text_models() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate::vision("gemini-2.0-flash", 0),
        ModelCandidate::vision("gemini-1.5-flash", 1),
    ]
}

/// Retry and backoff policy for one failover chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per model before advancing to the next candidate. Default: 3.
    pub max_attempts_per_model: u32,

    /// Base delay in milliseconds for the short exponential backoff applied
    /// to transient/unknown/unavailable failures. Doubles per attempt:
    /// 1 s → 2 s → 4 s. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Fixed wait in milliseconds after a rate-limit classification.
    /// Default: 10_000.
    ///
    /// Quota windows are externally imposed; a long fixed wait gives the
    /// window a real chance to clear at least once within the attempt
    /// budget, where a 1–3 s backoff would burn all attempts inside the
    /// same closed window.
    pub rate_limit_wait_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_model: 3,
            retry_backoff_ms: 1000,
            rate_limit_wait_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// The longest single wait this policy can impose.
    pub fn max_backoff(&self) -> Duration {
        let worst_exponential = self
            .retry_backoff_ms
            .saturating_mul(1u64 << self.max_attempts_per_model.saturating_sub(1).min(16));
        Duration::from_millis(self.rate_limit_wait_ms.max(worst_exponential))
    }
}

/// Placeholder strings injected for fields the model left blank, so the
/// caller never needs null-checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefaults {
    pub name: String,
    pub purpose: String,
    pub dosage: String,
    pub timing: String,
    pub duration: String,
    pub warnings: String,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            name: "Unknown Medicine".into(),
            purpose: "As prescribed by doctor".into(),
            dosage: "As directed".into(),
            timing: "As directed".into(),
            duration: "As prescribed".into(),
            warnings: "Follow doctor's advice".into(),
        }
    }
}

/// Configuration for a prescription-inference run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use rxplain::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_edge_px(1024)
///     .provider_name("gemini")
///     .overall_timeout_secs(90)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum length of the image's longer edge in pixels after resizing.
    /// Range: 512–4096. Default: 1536.
    ///
    /// 1536 px keeps handwriting legible to vision models while bounding
    /// the base64 payload well below provider upload limits. Drop to 1024
    /// when bandwidth matters more than small-print accuracy.
    pub max_edge_px: u32,

    /// JPEG re-encode quality factor. Range: 40–100. Default: 95.
    ///
    /// Prescriptions mix print and handwriting; aggressive JPEG artefacts
    /// destroy exactly the strokes a model needs to disambiguate drug
    /// names. 95 keeps them while still bounding payload size.
    pub jpeg_quality: u8,

    /// Apply contrast/sharpness/brightness enhancement before transmission.
    /// Default: true. A pure, deterministic transform with no retry
    /// semantics.
    pub enhance: bool,

    /// Sampling temperature for the model completion. Range 0.0–1.0.
    /// Default: 0.1.
    ///
    /// Transcription wants determinism, not creativity; anything above 0.2
    /// measurably increases invented medicine names.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_output_tokens: usize,

    /// Retry/backoff policy shared by both failover chains.
    pub retry: RetryPolicy,

    /// Ordered primary (vision) fallback chain.
    pub vision_models: Vec<ModelCandidate>,

    /// Ordered text-only chain for the OCR fallback path.
    pub text_models: Vec<ModelCandidate>,

    /// Output-schema revision embedded in prompts. Default: [`SCHEMA_VERSION`].
    pub schema_version: u16,

    /// Treat a parseable-but-empty model result (no medicines in either
    /// collection) as a failure and escalate down the fallback chain
    /// instead of trusting the model's negative finding. Default: false.
    pub escalate_empty_result: bool,

    /// Minimum OCR character count before the text fallback is attempted.
    /// Default: 10.
    pub min_ocr_chars: usize,

    /// Wall-clock budget for the whole `process` call. Checked before every
    /// network attempt and every backoff sleep; the pipeline never silently
    /// retries past it. Default: none.
    pub overall_timeout: Option<Duration>,

    /// Provider name (e.g. "gemini", "openai") used when no pre-built
    /// client is injected.
    pub provider_name: Option<String>,

    /// Pre-constructed model client. Takes precedence over `provider_name`.
    pub client: Option<Arc<dyn ModelClient>>,

    /// Local OCR engine for the fallback path. Defaults to the bundled
    /// tesseract-CLI engine when unset.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Observer notified of attempts, retries, and model switches.
    pub observer: Option<Arc<dyn PipelineObserver>>,

    /// Placeholder strings for fields the model left blank.
    pub defaults: FieldDefaults,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_edge_px: 1536,
            jpeg_quality: 95,
            enhance: true,
            temperature: 0.1,
            max_output_tokens: 4096,
            retry: RetryPolicy::default(),
            vision_models: default_vision_models(),
            text_models: default_text_models(),
            schema_version: SCHEMA_VERSION,
            escalate_empty_result: false,
            min_ocr_chars: 10,
            overall_timeout: None,
            provider_name: None,
            client: None,
            ocr_engine: None,
            observer: None,
            defaults: FieldDefaults::default(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_edge_px", &self.max_edge_px)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("enhance", &self.enhance)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("retry", &self.retry)
            .field("vision_models", &self.vision_models)
            .field("text_models", &self.text_models)
            .field("schema_version", &self.schema_version)
            .field("escalate_empty_result", &self.escalate_empty_result)
            .field("min_ocr_chars", &self.min_ocr_chars)
            .field("overall_timeout", &self.overall_timeout)
            .field("provider_name", &self.provider_name)
            .field("client", &self.client.as_ref().map(|_| "<dyn ModelClient>"))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upper bound on wall-clock time the two failover chains can consume.
    ///
    /// `(vision + text candidates) × attempts-per-model × longest wait`.
    /// Callers must size their own request timeouts above this bound, or
    /// set [`overall_timeout`](Self::overall_timeout) below their deadline
    /// so the pipeline aborts first.
    pub fn worst_case_latency(&self) -> Duration {
        let chains = (self.vision_models.len() + self.text_models.len()) as u32;
        let attempts = self.retry.max_attempts_per_model;
        self.retry
            .max_backoff()
            .saturating_mul(chains.saturating_mul(attempts))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_edge_px(mut self, px: u32) -> Self {
        self.config.max_edge_px = px.clamp(512, 4096);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(40, 100);
        self
    }

    pub fn enhance(mut self, v: bool) -> Self {
        self.config.enhance = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn vision_models(mut self, models: Vec<ModelCandidate>) -> Self {
        self.config.vision_models = models;
        self
    }

    pub fn text_models(mut self, models: Vec<ModelCandidate>) -> Self {
        self.config.text_models = models;
        self
    }

    pub fn schema_version(mut self, v: u16) -> Self {
        self.config.schema_version = v;
        self
    }

    pub fn escalate_empty_result(mut self, v: bool) -> Self {
        self.config.escalate_empty_result = v;
        self
    }

    pub fn min_ocr_chars(mut self, n: usize) -> Self {
        self.config.min_ocr_chars = n;
        self
    }

    pub fn overall_timeout_secs(mut self, secs: u64) -> Self {
        self.config.overall_timeout = Some(Duration::from_secs(secs));
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    pub fn defaults(mut self, defaults: FieldDefaults) -> Self {
        self.config.defaults = defaults;
        self
    }

    /// Build the configuration, validating constraints and sorting the
    /// fallback chains by priority.
    pub fn build(mut self) -> Result<PipelineConfig, RxplainError> {
        let c = &mut self.config;

        if c.vision_models.is_empty() {
            return Err(RxplainError::InvalidConfig(
                "vision model list must not be empty".into(),
            ));
        }
        if let Some(text_only) = c
            .vision_models
            .iter()
            .find(|m| m.modality == Modality::Text)
        {
            return Err(RxplainError::InvalidConfig(format!(
                "'{}' is text-only and cannot serve the vision chain",
                text_only.id
            )));
        }
        if c.retry.max_attempts_per_model == 0 {
            return Err(RxplainError::InvalidConfig(
                "attempts per model must be ≥ 1".into(),
            ));
        }
        if c.schema_version != SCHEMA_VERSION {
            return Err(RxplainError::InvalidConfig(format!(
                "unsupported schema version {} (current: {})",
                c.schema_version, SCHEMA_VERSION
            )));
        }

        c.vision_models.sort_by_key(|m| m.priority);
        c.text_models.sort_by_key(|m| m.priority);

        Ok(self.config)
    }
}
