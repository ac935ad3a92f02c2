//! Failover controller: the (model index, attempt index) state machine.
//!
//! Owns the ordered candidate list, the per-model retry loop, and the
//! classification-driven control flow. Callers never see partial attempts
//! — only the terminal outcome: raw model text, or exhaustion with the
//! last classified error.
//!
//! ## Backoff Strategy
//!
//! Two regimes, chosen by classification:
//!
//! * **Rate-limited** — a long *fixed* wait (default 10 s). Quota windows
//!   are externally imposed; short exponential backoff would burn the
//!   whole attempt budget inside the same closed window.
//! * **Transient / unknown / unavailable** — short exponential backoff
//!   (`retry_backoff_ms * 2^(attempt-1)`, default 1 s → 2 s → 4 s) to ride
//!   out blips without stalling the request.
//!
//! A fatal classification (model not found) skips the model immediately,
//! regardless of remaining attempt budget — retrying a retired model id
//! can never succeed.
//!
//! ## Cancellation
//!
//! The caller's deadline is checked before every network call and before
//! every sleep; a backoff that would overrun it aborts the chain instead.
//! The controller never silently retries past the caller's budget.

use crate::client::{GenerationParams, ImagePayload, ModelClient, ModelRequest};
use crate::config::{ModelCandidate, RetryPolicy};
use crate::error::ErrorKind;
use crate::pipeline::invoke::{self, AttemptOutcome};
use crate::progress::PipelineObserver;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// A wall-clock budget threaded through the controller.
///
/// `None` means unbounded. Suspension points (sleeps) and network calls
/// check it; nothing else does.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No budget; never expires.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// Expires `timeout` from now.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn exceeded(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Whether sleeping `wait` would run past the budget.
    pub fn would_exceed(&self, wait: Duration) -> bool {
        self.at.is_some_and(|at| Instant::now() + wait >= at)
    }
}

/// The immutable request shared by every candidate in one chain run; the
/// model id is substituted per attempt.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub system_prompt: String,
    /// Empty for vision requests; the OCR extraction for text requests.
    pub user_text: String,
    pub image: Option<ImagePayload>,
    pub params: GenerationParams,
}

impl PreparedRequest {
    fn for_model<'a>(&'a self, model: &'a str) -> ModelRequest<'a> {
        ModelRequest {
            model,
            system_prompt: &self.system_prompt,
            user_text: &self.user_text,
            image: self.image.as_ref(),
            params: &self.params,
        }
    }
}

/// Terminal success of one chain run.
#[derive(Debug, Clone)]
pub struct FailoverSuccess {
    /// The candidate that answered.
    pub model: String,
    /// Raw model text, unparsed.
    pub raw: String,
    /// Total attempts spent across all candidates, including the
    /// successful one.
    pub attempts: u32,
}

/// The last classified failure when a chain is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub model: String,
    pub kind: ErrorKind,
    pub detail: String,
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}: {}", self.kind, self.model, self.detail)
    }
}

/// Terminal exhaustion: every candidate failed (or the deadline expired).
#[derive(Debug, Clone)]
pub struct Exhausted {
    /// `None` only for an empty candidate list.
    pub last: Option<LastError>,
    /// True when the chain stopped because the caller's budget ran out
    /// rather than because every candidate was tried.
    pub deadline_exceeded: bool,
}

impl Exhausted {
    /// Human-readable detail for the terminal aggregate error.
    pub fn detail(&self) -> String {
        let base = match &self.last {
            Some(last) => last.to_string(),
            None => "no model candidates configured".to_string(),
        };
        if self.deadline_exceeded {
            format!("{base} (deadline exceeded)")
        } else {
            base
        }
    }
}

/// Drive one ordered candidate chain to a terminal outcome.
///
/// Sequential and single-flight by design: each attempt must complete
/// before the next decision, because the backoff regime depends on the
/// immediately preceding attempt's classification.
pub async fn run_chain(
    client: &dyn ModelClient,
    candidates: &[ModelCandidate],
    request: &PreparedRequest,
    policy: &RetryPolicy,
    deadline: Deadline,
    observer: &dyn PipelineObserver,
) -> Result<FailoverSuccess, Exhausted> {
    let mut last: Option<LastError> = None;
    let mut total_attempts: u32 = 0;

    'candidates: for candidate in candidates {
        info!(model = %candidate.id, "trying model");
        let mut attempt_idx: u32 = 0;

        loop {
            if deadline.exceeded() {
                warn!(model = %candidate.id, "deadline exceeded before attempt");
                return Err(Exhausted {
                    last,
                    deadline_exceeded: true,
                });
            }

            observer.on_attempt(&candidate.id, attempt_idx);
            total_attempts += 1;

            match invoke::attempt(client, &request.for_model(&candidate.id)).await {
                AttemptOutcome::Success(raw) => {
                    info!(model = %candidate.id, attempts = total_attempts, "chain succeeded");
                    return Ok(FailoverSuccess {
                        model: candidate.id.clone(),
                        raw,
                        attempts: total_attempts,
                    });
                }
                AttemptOutcome::Fatal { kind, detail } => {
                    observer.on_attempt_failed(&candidate.id, attempt_idx, kind, &detail);
                    observer.on_model_advance(&candidate.id);
                    last = Some(LastError {
                        model: candidate.id.clone(),
                        kind,
                        detail,
                    });
                    continue 'candidates;
                }
                AttemptOutcome::Retryable { kind, detail } => {
                    observer.on_attempt_failed(&candidate.id, attempt_idx, kind, &detail);
                    last = Some(LastError {
                        model: candidate.id.clone(),
                        kind,
                        detail,
                    });

                    attempt_idx += 1;
                    if attempt_idx >= policy.max_attempts_per_model {
                        observer.on_model_advance(&candidate.id);
                        continue 'candidates;
                    }

                    let wait = backoff(policy, kind, attempt_idx);
                    if deadline.would_exceed(wait) {
                        warn!(model = %candidate.id, "backoff would exceed deadline, aborting chain");
                        return Err(Exhausted {
                            last,
                            deadline_exceeded: true,
                        });
                    }
                    warn!(
                        model = %candidate.id,
                        attempt = attempt_idx,
                        wait_ms = wait.as_millis() as u64,
                        "retrying after backoff"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    Err(Exhausted {
        last,
        deadline_exceeded: false,
    })
}

/// The wait before retry number `attempt_idx` (1-indexed) on the same
/// model.
fn backoff(policy: &RetryPolicy, kind: ErrorKind, attempt_idx: u32) -> Duration {
    match kind {
        ErrorKind::RateLimited => Duration::from_millis(policy.rate_limit_wait_ms),
        _ => {
            let factor = 1u64 << (attempt_idx.saturating_sub(1)).min(16);
            Duration::from_millis(policy.retry_backoff_ms.saturating_mul(factor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::progress::NoopObserver;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted client: per-model queues of outcomes, recording the exact
    /// invocation order.
    struct ScriptedClient {
        script: Mutex<HashMap<String, Vec<Result<String, ClientError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<(&str, Vec<Result<String, ClientError>>)>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(model, outcomes)| (model.to_string(), outcomes))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ClientError> {
            self.calls.lock().unwrap().push(request.model.to_string());
            let mut script = self.script.lock().unwrap();
            match script.get_mut(request.model) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Err(ClientError::message("script exhausted")),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_model: 3,
            retry_backoff_ms: 1,
            rate_limit_wait_ms: 1,
        }
    }

    fn prepared() -> PreparedRequest {
        PreparedRequest {
            system_prompt: "prompt".into(),
            user_text: String::new(),
            image: None,
            params: GenerationParams {
                temperature: 0.1,
                max_output_tokens: 4096,
            },
        }
    }

    fn candidates(ids: &[&str]) -> Vec<ModelCandidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ModelCandidate::vision(*id, i as u8))
            .collect()
    }

    fn not_found() -> Result<String, ClientError> {
        Err(ClientError::new(Some(404), "model not found"))
    }

    fn rate_limited() -> Result<String, ClientError> {
        Err(ClientError::new(Some(429), "quota exceeded"))
    }

    #[tokio::test]
    async fn first_success_terminates_chain() {
        let client = ScriptedClient::new(vec![("a", vec![Ok("raw text".into())])]);
        let success = run_chain(
            &client,
            &candidates(&["a", "b"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(success.model, "a");
        assert_eq!(success.raw, "raw text");
        assert_eq!(success.attempts, 1);
        assert_eq!(client.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn not_found_skips_without_retry_and_later_models_untouched() {
        // A always 404s, B succeeds: A invoked exactly once, B exactly
        // once, C never.
        let client = ScriptedClient::new(vec![
            ("a", vec![not_found(), not_found(), not_found()]),
            ("b", vec![Ok("from b".into())]),
            ("c", vec![Ok("never".into())]),
        ]);
        let success = run_chain(
            &client,
            &candidates(&["a", "b", "c"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(success.model, "b");
        assert_eq!(client.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rate_limit_retries_same_model_up_to_budget() {
        let client = ScriptedClient::new(vec![
            ("a", vec![rate_limited(), rate_limited(), Ok("third try".into())]),
        ]);
        let success = run_chain(
            &client,
            &candidates(&["a"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(success.raw, "third try");
        assert_eq!(client.calls(), vec!["a", "a", "a"]);
    }

    #[tokio::test]
    async fn budget_exhaustion_advances_to_next_model() {
        let client = ScriptedClient::new(vec![
            ("a", vec![rate_limited(), rate_limited(), rate_limited()]),
            ("b", vec![Ok("from b".into())]),
        ]);
        let success = run_chain(
            &client,
            &candidates(&["a", "b"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(success.model, "b");
        assert_eq!(client.calls(), vec!["a", "a", "a", "b"]);
    }

    #[tokio::test]
    async fn full_exhaustion_reports_last_error() {
        let client = ScriptedClient::new(vec![
            ("a", vec![not_found()]),
            ("b", vec![rate_limited(), rate_limited(), rate_limited()]),
        ]);
        let exhausted = run_chain(
            &client,
            &candidates(&["a", "b"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap_err();

        let last = exhausted.last.unwrap();
        assert_eq!(last.model, "b");
        assert_eq!(last.kind, ErrorKind::RateLimited);
        assert!(!exhausted.deadline_exceeded);
    }

    #[tokio::test]
    async fn empty_body_retries_as_transient() {
        let client = ScriptedClient::new(vec![("a", vec![Ok("  ".into()), Ok("real".into())])]);
        let success = run_chain(
            &client,
            &candidates(&["a"]),
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap();

        assert_eq!(success.raw, "real");
        assert_eq!(client.calls(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_any_call() {
        let client = ScriptedClient::new(vec![("a", vec![Ok("never".into())])]);
        let exhausted = run_chain(
            &client,
            &candidates(&["a"]),
            &prepared(),
            &fast_policy(),
            Deadline::from_timeout(Some(Duration::ZERO)),
            &NoopObserver,
        )
        .await
        .unwrap_err();

        assert!(exhausted.deadline_exceeded);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn deadline_aborts_instead_of_long_backoff() {
        // First attempt rate-limits; the 10 min wait would blow the 50 ms
        // budget, so the chain aborts without a second call.
        let policy = RetryPolicy {
            max_attempts_per_model: 3,
            retry_backoff_ms: 1,
            rate_limit_wait_ms: 600_000,
        };
        let client = ScriptedClient::new(vec![("a", vec![rate_limited(), Ok("never".into())])]);
        let exhausted = run_chain(
            &client,
            &candidates(&["a"]),
            &prepared(),
            &policy,
            Deadline::from_timeout(Some(Duration::from_millis(50))),
            &NoopObserver,
        )
        .await
        .unwrap_err();

        assert!(exhausted.deadline_exceeded);
        assert_eq!(client.calls(), vec!["a"]);
        assert_eq!(exhausted.last.unwrap().kind, ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn empty_candidate_list_exhausts_immediately() {
        let client = ScriptedClient::new(vec![]);
        let exhausted = run_chain(
            &client,
            &[],
            &prepared(),
            &fast_policy(),
            Deadline::unbounded(),
            &NoopObserver,
        )
        .await
        .unwrap_err();

        assert!(exhausted.last.is_none());
        assert!(exhausted.detail().contains("no model candidates"));
    }

    #[test]
    fn backoff_regimes() {
        let policy = RetryPolicy {
            max_attempts_per_model: 3,
            retry_backoff_ms: 1000,
            rate_limit_wait_ms: 10_000,
        };
        // Fixed long wait for rate limits, regardless of attempt index.
        assert_eq!(
            backoff(&policy, ErrorKind::RateLimited, 1),
            Duration::from_secs(10)
        );
        assert_eq!(
            backoff(&policy, ErrorKind::RateLimited, 2),
            Duration::from_secs(10)
        );
        // Exponential for everything else: 1 s, 2 s, 4 s.
        assert_eq!(backoff(&policy, ErrorKind::Transient, 1), Duration::from_secs(1));
        assert_eq!(backoff(&policy, ErrorKind::Unknown, 2), Duration::from_secs(2));
        assert_eq!(
            backoff(&policy, ErrorKind::ModelUnavailable, 3),
            Duration::from_secs(4)
        );
    }
}
