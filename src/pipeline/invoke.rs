//! Model invocation: exactly one network round trip, classified.
//!
//! This is the only boundary that ever inspects raw provider error text.
//! [`classify`] is a total, pure mapping from provider-shaped failures to
//! the closed [`ErrorKind`] enum; everything downstream (the failover
//! controller above all) branches on the enum alone. Provider SDKs report
//! quota exhaustion, retired models, and overload in wildly different
//! shapes — folding them here keeps the rest of the system free of
//! stringly-typed error handling.

use crate::client::{ClientError, ModelClient, ModelRequest};
use crate::error::ErrorKind;
use tracing::{debug, warn};

/// The outcome of one attempt against one model candidate.
///
/// Produced here, consumed only by the failover controller, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Non-empty response body.
    Success(String),
    /// Worth retrying on the same model (subject to attempt budget).
    Retryable { kind: ErrorKind, detail: String },
    /// The model must be skipped immediately, no further attempts.
    Fatal { kind: ErrorKind, detail: String },
}

/// Perform one round trip and classify the result.
///
/// An empty or blank response body from an otherwise-successful call is a
/// soft failure, not success — models occasionally return 200-with-nothing
/// under load, and treating that as terminal would hand the caller an
/// empty result a retry would have filled.
pub async fn attempt(client: &dyn ModelClient, request: &ModelRequest<'_>) -> AttemptOutcome {
    match client.generate(request).await {
        Ok(text) if text.trim().is_empty() => {
            warn!(model = request.model, "empty response body");
            AttemptOutcome::Retryable {
                kind: ErrorKind::Transient,
                detail: "empty response body".into(),
            }
        }
        Ok(text) => {
            debug!(model = request.model, bytes = text.len(), "attempt succeeded");
            AttemptOutcome::Success(text)
        }
        Err(e) => {
            let kind = classify(&e);
            warn!(
                model = request.model,
                kind = %kind,
                "attempt failed: {e}"
            );
            let detail = e.to_string();
            if kind.is_fatal_for_model() {
                AttemptOutcome::Fatal { kind, detail }
            } else {
                AttemptOutcome::Retryable { kind, detail }
            }
        }
    }
}

/// Classify a failed round trip into the closed [`ErrorKind`] set.
///
/// Total by construction: every input maps to exactly one kind, with
/// [`ErrorKind::Unknown`] as the residual class. The status code wins when
/// the transport exposes one; otherwise the provider's message text is
/// matched against the substrings the major SDKs are known to emit.
pub fn classify(error: &ClientError) -> ErrorKind {
    match error.status {
        Some(429) => return ErrorKind::RateLimited,
        Some(404) => return ErrorKind::ModelNotFound,
        Some(503) => return ErrorKind::ModelUnavailable,
        _ => {}
    }

    let lower = error.message.to_lowercase();

    if lower.contains("429")
        || lower.contains("resource_exhausted")
        || lower.contains("resource exhausted")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
    {
        ErrorKind::RateLimited
    } else if lower.contains("404") || lower.contains("not found") || lower.contains("not_found") {
        ErrorKind::ModelNotFound
    } else if lower.contains("503") || lower.contains("unavailable") || lower.contains("overloaded")
    {
        ErrorKind::ModelUnavailable
    } else {
        ErrorKind::Unknown
    }
}
