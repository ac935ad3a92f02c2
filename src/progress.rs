//! Observer trait for per-attempt pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive real-time
//! events as the failover controller walks the model chain.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a progress spinner, a log sink, or a metrics
//! counter without the library knowing anything about how the host
//! application communicates. The trait is `Send + Sync` so one observer
//! can serve many concurrent pipeline runs.

use crate::error::ErrorKind;
use std::sync::Arc;

/// Called by the failover controller as it drives model attempts.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. A single observer may be shared across concurrent
/// requests; implementations must protect shared mutable state.
pub trait PipelineObserver: Send + Sync {
    /// Called just before a network attempt is made.
    ///
    /// `attempt` is 0-indexed within the current model.
    fn on_attempt(&self, model: &str, attempt: u32) {
        let _ = (model, attempt);
    }

    /// Called when an attempt fails with a classified error, before any
    /// backoff sleep.
    fn on_attempt_failed(&self, model: &str, attempt: u32, kind: ErrorKind, detail: &str) {
        let _ = (model, attempt, kind, detail);
    }

    /// Called when the controller abandons the current model and advances
    /// to the next candidate.
    fn on_model_advance(&self, exhausted_model: &str) {
        let _ = exhausted_model;
    }

    /// Called once if the primary chain is exhausted and the OCR fallback
    /// path starts.
    fn on_fallback_started(&self) {}

    /// Called once when the pipeline reaches a terminal state.
    fn on_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in
/// [`crate::config::PipelineConfig`].
pub type Observer = Arc<dyn PipelineObserver>;
