//! Error types for the rxplain library.
//!
//! Two layers of failure exist and must not be confused:
//!
//! * [`ErrorKind`] — the **classification** of a single model attempt.
//!   Produced by the invoker, consumed only by the failover controller to
//!   decide retry/advance/abort. These never surface to callers on their
//!   own; transient and rate-limit classes are recovered locally.
//!
//! * [`RxplainError`] — the **terminal** errors a caller can actually see.
//!   Either an input problem that retrying cannot fix (unreadable image,
//!   insufficient OCR text) or the single aggregate `PipelineFailed` after
//!   every model and the OCR fallback were exhausted, carrying the last
//!   underlying error for diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All terminal errors returned by the rxplain library.
///
/// Per-attempt failures are classified as [`ErrorKind`] and handled inside
/// the failover controller rather than propagated here.
#[derive(Debug, Error)]
pub enum RxplainError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The supplied bytes could not be decoded as an image.
    ///
    /// Surfaces immediately without retry: no amount of backoff fixes a
    /// corrupt photograph.
    #[error("Could not decode the prescription image: {detail}\nSupported formats: JPEG, PNG.")]
    UnreadableImage { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ClientNotConfigured { provider: String, hint: String },

    /// The model returned text that could not be normalized into the
    /// output schema even after fence stripping and field repair.
    #[error("Model response could not be parsed into the expected schema: {detail}")]
    MalformedResponse { detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// Local OCR extracted too little text to be worth sending to a model.
    ///
    /// Surfaces immediately without retry: re-running OCR on the same blank
    /// photograph cannot produce more text.
    #[error(
        "OCR extracted only {chars} characters (minimum {min}).\n\
         The photograph is likely too blurry or blank — retake it with better lighting."
    )]
    OcrInsufficientText { chars: usize, min: usize },

    // ── Terminal aggregate ────────────────────────────────────────────────
    /// Every vision model and the OCR fallback were exhausted.
    ///
    /// The only aggregate error callers see for chain failure; `detail`
    /// carries the last underlying classified error for diagnostics.
    #[error(
        "All AI models and the OCR fallback failed. Please try again with a clearer image.\n\
         Last error: {detail}"
    )]
    PipelineFailed { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of a single failed model attempt.
///
/// The closed set the failover controller branches on. Produced exclusively
/// by [`crate::pipeline::invoke::classify`]; no other module inspects raw
/// provider error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Quota or rate-limit exhaustion (429, "RESOURCE_EXHAUSTED", "quota").
    /// Retried on the same model after a long fixed wait so the quota
    /// window can plausibly clear at least once.
    RateLimited,
    /// The provider reported itself temporarily unavailable (503,
    /// "UNAVAILABLE", "overloaded"). Retried with short exponential backoff.
    ModelUnavailable,
    /// The named model does not exist or is retired (404, "not found").
    /// Never retried on the same model — only skipped.
    ModelNotFound,
    /// A soft failure such as an empty response body from an otherwise
    /// successful call. Retried with short exponential backoff.
    Transient,
    /// Anything else (network, auth, serialization…). Retried with short
    /// exponential backoff.
    Unknown,
}

impl ErrorKind {
    /// Whether the current model must be skipped without further attempts,
    /// regardless of remaining attempt budget.
    pub fn is_fatal_for_model(self) -> bool {
        matches!(self, ErrorKind::ModelNotFound)
    }

    /// Stable lowercase name, used in log lines and error details.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
