//! OCR fallback: local text extraction plus the text-only model chain.
//!
//! Triggered only after the primary vision chain is terminally exhausted
//! (or its response could not be normalized). Extracts text locally, and
//! if enough came out, re-submits a text-only prompt over a second —
//! typically shorter — failover chain through the same normalizer.
//!
//! This is the pipeline's last resort: any failure in here folds into the
//! single terminal [`RxplainError::PipelineFailed`] so the caller sees one
//! error shape regardless of which path died.
//!
//! ## Why spawn_blocking?
//!
//! Image preprocessing and the tesseract subprocess are CPU-/process-bound;
//! running them on a dedicated blocking thread keeps the Tokio workers free
//! for the (many) concurrent requests that are mid-backoff.

use crate::client::{GenerationParams, ModelClient};
use crate::config::{Modality, PipelineConfig};
use crate::error::RxplainError;
use crate::output::PipelineResult;
use crate::pipeline::failover::{self, Deadline, PreparedRequest};
use crate::pipeline::normalize;
use crate::progress::PipelineObserver;
use crate::prompts;
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

/// Local optical-character-recognition engine.
///
/// Implementations are synchronous (the fallback driver wraps them in
/// `spawn_blocking`) and must be cheap to share across requests.
pub trait OcrEngine: Send + Sync {
    /// Best-effort plain-text extraction from raw image bytes.
    fn extract_text(&self, image: &[u8]) -> Result<String, String>;
}

/// Default engine: preprocess with the `image` crate, then shell out to
/// the `tesseract` binary.
///
/// Invoking the CLI instead of linking libtesseract keeps the build free
/// of native-library coupling; the trait seam lets deployments swap in a
/// linked engine where the subprocess cost matters.
pub struct TesseractCli {
    /// Tesseract language code(s), e.g. "eng" or "eng+hin".
    pub languages: String,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            languages: "eng".into(),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn extract_text(&self, image: &[u8]) -> Result<String, String> {
        let img = image::load_from_memory(image).map_err(|e| format!("decode failed: {e}"))?;

        // Grayscale + contrast + hard threshold: handwriting strokes go
        // solid black, paper texture goes white, and tesseract's line
        // segmentation stops chasing shadows.
        let mut gray = img.grayscale().adjust_contrast(50.0).to_luma8();
        for px in gray.pixels_mut() {
            px.0[0] = if px.0[0] < 140 { 0 } else { 255 };
        }

        let tmp = tempfile::Builder::new()
            .prefix("rxplain-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("tempfile: {e}"))?;
        image::DynamicImage::ImageLuma8(gray)
            .save(tmp.path())
            .map_err(|e| format!("preprocessed image write failed: {e}"))?;

        let output = Command::new("tesseract")
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg("6")
            .output()
            .map_err(|e| format!("failed to run tesseract (is it installed?): {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tesseract failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Drive the complete OCR fallback: extract, gate, prompt, failover,
/// normalize.
///
/// `last_primary_error` is the detail from the exhausted primary chain,
/// kept so the terminal aggregate can report the most useful diagnosis.
#[allow(clippy::too_many_arguments)]
pub async fn run_ocr_fallback(
    client: &dyn ModelClient,
    engine: Arc<dyn OcrEngine>,
    image_bytes: &[u8],
    language: &str,
    config: &PipelineConfig,
    deadline: Deadline,
    observer: &dyn PipelineObserver,
    last_primary_error: &str,
) -> Result<PipelineResult, RxplainError> {
    info!("primary chain exhausted, attempting OCR fallback");
    observer.on_fallback_started();

    let bytes = image_bytes.to_vec();
    let extracted = tokio::task::spawn_blocking(move || engine.extract_text(&bytes))
        .await
        .map_err(|e| RxplainError::Internal(format!("OCR task panicked: {e}")))?;

    let text = match extracted {
        Ok(text) => text,
        Err(detail) => {
            warn!("OCR extraction failed: {detail}");
            return Err(RxplainError::PipelineFailed {
                detail: format!("{last_primary_error}; OCR extraction failed: {detail}"),
            });
        }
    };

    // Model invocation on near-empty input only hallucinates; fail fast so
    // the user retakes the photo instead of waiting out another chain.
    let chars = text.chars().count();
    if chars < config.min_ocr_chars {
        return Err(RxplainError::OcrInsufficientText {
            chars,
            min: config.min_ocr_chars,
        });
    }
    info!(chars, "OCR extracted text, driving text chain");

    run_text_chain(client, &text, language, config, deadline, observer, last_primary_error).await
}

/// Drive the text-only failover chain for already-extracted text and
/// normalize the winner. Shared by the OCR fallback and the direct
/// text-input entry point.
pub async fn run_text_chain(
    client: &dyn ModelClient,
    text: &str,
    language: &str,
    config: &PipelineConfig,
    deadline: Deadline,
    observer: &dyn PipelineObserver,
    context_error: &str,
) -> Result<PipelineResult, RxplainError> {
    let request = PreparedRequest {
        system_prompt: prompts::instruction_prompt(language, Modality::Text),
        user_text: text.to_string(),
        image: None,
        params: GenerationParams {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        },
    };

    let success = failover::run_chain(
        client,
        &config.text_models,
        &request,
        &config.retry,
        deadline,
        observer,
    )
    .await
    .map_err(|exhausted| RxplainError::PipelineFailed {
        detail: join_context(context_error, &exhausted.detail()),
    })?;

    normalize::normalize_response(&success.raw, config).map_err(|e| RxplainError::PipelineFailed {
        detail: join_context(context_error, &format!("text-chain response from {}: {e}", success.model)),
    })
}

fn join_context(context: &str, current: &str) -> String {
    if context.is_empty() {
        current.to_string()
    } else {
        format!("{context}; {current}")
    }
}
