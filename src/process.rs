//! Top-level orchestration entry points.
//!
//! One call per prescription: the pipeline is sequential and single-flight
//! per request, holds no shared mutable state across requests, and returns
//! exactly one of a fully normalized [`PipelineResult`] or one terminal
//! [`RxplainError`] — never partial results, never an unhandled panic
//! surfaced to the request handler.

use crate::client::{resolve_client, GenerationParams};
use crate::config::{Modality, PipelineConfig, SCHEMA_VERSION};
use crate::error::RxplainError;
use crate::output::PipelineResult;
use crate::pipeline::failover::{self, Deadline, PreparedRequest};
use crate::pipeline::ocr::{self, TesseractCli};
use crate::pipeline::{image, normalize};
use crate::progress::{NoopObserver, PipelineObserver};
use crate::prompts;
use std::sync::Arc;
use tracing::{info, warn};

/// What the caller supplies: a photograph, or text it already extracted.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Raw photo bytes in any decodable format.
    Image(Vec<u8>),
    /// Pre-extracted prescription text; drives the text chain directly
    /// (no image normalisation, no OCR).
    Text(String),
}

/// The immutable value describing one inference run.
///
/// Created once per caller invocation, owned exclusively by the
/// orchestration call, never mutated.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub input: PipelineInput,
    /// Target language name, e.g. "Hindi".
    pub language: String,
    pub schema_version: u16,
}

/// Interpret a prescription into structured, translated instructions.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`    — photo bytes or pre-extracted text
/// * `language` — target language name, e.g. "Hindi"
/// * `config`   — pipeline configuration (model chains, retry policy, …)
///
/// # Errors
/// * [`RxplainError::UnreadableImage`] / [`RxplainError::OcrInsufficientText`]
///   — input problems, surfaced immediately without retry
/// * [`RxplainError::ClientNotConfigured`] — no provider available
/// * [`RxplainError::PipelineFailed`] — every model and the OCR fallback
///   were exhausted; carries the last underlying error
///
/// Transient, rate-limit, and model-not-found failures are recovered
/// internally and never surface individually.
pub async fn process(
    input: PipelineInput,
    language: impl Into<String>,
    config: &PipelineConfig,
) -> Result<PipelineResult, RxplainError> {
    if config.schema_version != SCHEMA_VERSION {
        return Err(RxplainError::InvalidConfig(format!(
            "unsupported schema version {} (current: {})",
            config.schema_version, SCHEMA_VERSION
        )));
    }

    let request = InferenceRequest {
        input,
        language: language.into(),
        schema_version: config.schema_version,
    };

    let client = resolve_client(config)?;
    let observer: Arc<dyn PipelineObserver> = config
        .observer
        .clone()
        .unwrap_or_else(|| Arc::new(NoopObserver));
    let deadline = Deadline::from_timeout(config.overall_timeout);

    let outcome = match &request.input {
        PipelineInput::Image(bytes) => {
            run_vision_first(bytes, &request.language, config, client.as_ref(), deadline, observer.as_ref())
                .await
        }
        PipelineInput::Text(text) => {
            ocr::run_text_chain(
                client.as_ref(),
                text,
                &request.language,
                config,
                deadline,
                observer.as_ref(),
                "",
            )
            .await
        }
    };

    observer.on_complete(outcome.is_ok());
    outcome
}

/// The image path: normalize → vision chain → validate, falling back to
/// OCR on exhaustion, on a response that will not normalize, or (when
/// configured) on an escalated empty result.
async fn run_vision_first(
    bytes: &[u8],
    language: &str,
    config: &PipelineConfig,
    client: &dyn crate::client::ModelClient,
    deadline: Deadline,
    observer: &dyn PipelineObserver,
) -> Result<PipelineResult, RxplainError> {
    // ── Step 1: canonical payload ────────────────────────────────────────
    let payload = image::normalize_image(bytes.to_vec(), config).await?;

    // ── Step 2: primary (vision) chain ───────────────────────────────────
    let request = PreparedRequest {
        system_prompt: prompts::instruction_prompt(language, Modality::Vision),
        user_text: String::new(),
        image: Some(payload),
        params: GenerationParams {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        },
    };

    let fallback_context: String;
    match failover::run_chain(
        client,
        &config.vision_models,
        &request,
        &config.retry,
        deadline,
        observer,
    )
    .await
    {
        Ok(success) => {
            // ── Step 3: normalize & validate ─────────────────────────────
            match normalize::normalize_response(&success.raw, config) {
                Ok(result) => {
                    if config.escalate_empty_result && result.is_empty() {
                        warn!(
                            model = %success.model,
                            "empty result escalated to OCR fallback"
                        );
                        fallback_context =
                            format!("empty result from {} escalated", success.model);
                    } else {
                        info!(
                            model = %success.model,
                            medicines = result.english.len(),
                            "pipeline succeeded on vision chain"
                        );
                        return Ok(result);
                    }
                }
                Err(e) => {
                    warn!(model = %success.model, "vision response failed normalization: {e}");
                    fallback_context = format!("vision response from {}: {e}", success.model);
                }
            }
        }
        Err(exhausted) => {
            fallback_context = exhausted.detail();
        }
    }

    // ── Step 4: OCR fallback path ────────────────────────────────────────
    let engine = config
        .ocr_engine
        .clone()
        .unwrap_or_else(|| Arc::new(TesseractCli::default()));

    ocr::run_ocr_fallback(
        client,
        engine,
        bytes,
        language,
        config,
        deadline,
        observer,
        &fallback_context,
    )
    .await
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input: PipelineInput,
    language: impl Into<String>,
    config: &PipelineConfig,
) -> Result<PipelineResult, RxplainError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RxplainError::Internal(format!("failed to create tokio runtime: {e}")))?
        .block_on(process(input, language, config))
}

/// Like [`process`], but never fails: terminal errors become the
/// error-report shape (`error` key set, both collections empty) that
/// templating callers can render without branching.
pub async fn process_report(
    input: PipelineInput,
    language: impl Into<String>,
    config: &PipelineConfig,
) -> PipelineResult {
    match process(input, language, config).await {
        Ok(result) => result,
        Err(e) => PipelineResult::failure(e.to_string()),
    }
}
