//! Submitting finalized attempts and reconciling server scores
//!
//! The provisional score computed on the client is shown right away. The
//! server's response, when it carries a score, overrides it. Every retry of
//! the same attempt reuses its idempotency key so the server records it once.

mod retry;

pub use retry::RetryPolicy;

use crate::attempt::{Answers, Attempt};
use crate::scoring::ScoreBreakdown;
use crate::transport::{SubmissionTransport, TransportError};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Server endpoint a session's attempt is handed in to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTarget {
    method: Method,
    path: String,
}

impl SubmitTarget {
    /// Any path below the API base, e.g. `/tools/tests/7/submit`. Sent as `POST`.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method: Method::POST,
            path,
        }
    }

    pub fn practice_test(test_id: impl std::fmt::Display) -> Self {
        Self::new(format!("/tools/tests/{test_id}/submit"))
    }

    /// Completing a pomodoro updates the existing timer session in place.
    pub fn study_timer(session_id: impl std::fmt::Display) -> Self {
        Self::new(format!("/tools/timer/sessions/{session_id}/complete")).with_method(Method::PUT)
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Body of a submission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRequest {
    /// The attempt's idempotency key
    pub attempt_id: String,
    pub answers: Answers,
    pub score: Option<u32>,
    pub max_score: Option<u32>,
    pub time_spent_seconds: u64,
}

impl SubmissionRequest {
    pub fn from_attempt(attempt: &Attempt, provisional: Option<&ScoreBreakdown>) -> Self {
        Self {
            attempt_id: attempt.idempotency_key.clone(),
            answers: attempt.answers.clone(),
            score: provisional.map(|s| s.total),
            max_score: provisional.map(|s| s.max),
            time_spent_seconds: attempt.time_spent().as_secs(),
        }
    }
}

/// What the server said about an accepted submission.
///
/// Both fields are absent when the server only acknowledged receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "ReceiptWire")]
pub struct SubmissionReceipt {
    pub score: Option<u32>,
    pub max_score: Option<u32>,
}

/// Accepts `{score, max_score}` at the top level or under `attempt`.
#[derive(Deserialize)]
struct ReceiptWire {
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    max_score: Option<u32>,
    #[serde(default)]
    attempt: Option<ReceiptScores>,
}

#[derive(Deserialize)]
struct ReceiptScores {
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    max_score: Option<u32>,
}

impl From<ReceiptWire> for SubmissionReceipt {
    fn from(wire: ReceiptWire) -> Self {
        let nested = wire.attempt.unwrap_or(ReceiptScores {
            score: None,
            max_score: None,
        });
        Self {
            score: wire.score.or(nested.score),
            max_score: wire.max_score.or(nested.max_score),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Score reported by the server
    Server,
    /// Client score, accepted by a server that returned none of its own
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthoritativeScore {
    pub total: u32,
    pub max: u32,
    pub source: ScoreSource,
}

/// Outcome of a confirmed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub idempotency_key: String,
    pub provisional: Option<ScoreBreakdown>,
    /// `None` only for sessions without a score, such as focus timers
    pub authoritative: Option<AuthoritativeScore>,
    /// The server's score differs from the provisional one
    pub overridden: bool,
    /// Requests it took, including the successful one
    pub attempts: u32,
}

impl Reconciled {
    fn merge(
        idempotency_key: &str,
        provisional: Option<&ScoreBreakdown>,
        receipt: SubmissionReceipt,
        attempts: u32,
    ) -> Self {
        let authoritative = match (receipt.score, provisional) {
            (Some(total), _) => Some(AuthoritativeScore {
                total,
                max: receipt
                    .max_score
                    .or(provisional.map(|p| p.max))
                    .unwrap_or(total),
                source: ScoreSource::Server,
            }),
            (None, Some(p)) => Some(AuthoritativeScore {
                total: p.total,
                max: p.max,
                source: ScoreSource::Confirmed,
            }),
            (None, None) => None,
        };
        let overridden = match (provisional, authoritative) {
            (Some(p), Some(a)) => (p.total, p.max) != (a.total, a.max),
            _ => false,
        };
        Self {
            idempotency_key: idempotency_key.to_string(),
            provisional: provisional.cloned(),
            authoritative,
            overridden,
            attempts,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// Retries are exhausted or the error was not retryable. The provisional
    /// score stays valid for display.
    #[error("Submission failed after {attempts} attempt(s): {last_error}")]
    SubmissionFailed {
        attempts: u32,
        #[source]
        last_error: TransportError,
        provisional: Option<ScoreBreakdown>,
    },
}

/// Hands attempts to the server with bounded retries.
///
/// Results are cached by idempotency key, so re-submitting a confirmed
/// attempt returns the earlier outcome without another request.
pub struct ReconciliationLayer<T: SubmissionTransport> {
    transport: T,
    policy: RetryPolicy,
    confirmed: Mutex<HashMap<String, Reconciled>>,
}

impl<T: SubmissionTransport> ReconciliationLayer<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            confirmed: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Earlier confirmed outcome for `idempotency_key`, if any
    pub fn confirmed(&self, idempotency_key: &str) -> Option<Reconciled> {
        self.confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(idempotency_key)
            .cloned()
    }

    /// Submit a frozen attempt and merge the server's answer with `provisional`.
    pub async fn submit(
        &self,
        target: &SubmitTarget,
        attempt: &Attempt,
        provisional: Option<&ScoreBreakdown>,
    ) -> Result<Reconciled, ReconcileError> {
        if let Some(done) = self.confirmed(&attempt.idempotency_key) {
            tracing::debug!(idempotency_key = %attempt.idempotency_key, "Attempt already confirmed");
            return Ok(done);
        }

        let request = SubmissionRequest::from_attempt(attempt, provisional);
        let mut tries = 0u32;
        loop {
            tries += 1;
            match self.transport.submit(target, &request).await {
                Ok(receipt) => {
                    let reconciled =
                        Reconciled::merge(&attempt.idempotency_key, provisional, receipt, tries);
                    if reconciled.overridden {
                        tracing::info!(
                            session_id = %attempt.session_id,
                            provisional = ?provisional.map(|p| p.total),
                            server = ?receipt.score,
                            "Server score overrides provisional score"
                        );
                    }
                    tracing::info!(
                        session_id = %attempt.session_id,
                        path = target.path(),
                        attempts = tries,
                        "Submission confirmed"
                    );
                    self.confirmed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(attempt.idempotency_key.clone(), reconciled.clone());
                    return Ok(reconciled);
                }
                Err(e) if e.is_retryable() && tries < self.policy.max_attempts => {
                    let delay = self.policy.delay_with_hint(tries, e.retry_after);
                    tracing::warn!(
                        session_id = %attempt.session_id,
                        attempt = tries,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %attempt.session_id,
                        attempts = tries,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Submission failed"
                    );
                    return Err(ReconcileError::SubmissionFailed {
                        attempts: tries,
                        last_error: e,
                        provisional: provisional.cloned(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{score, AnswerKey, KeyEntry};
    use crate::transport::testing::ScriptedSubmissionTransport;
    use crate::transport::TransportErrorKind;
    use std::sync::Arc;
    use std::time::Duration;

    fn frozen_attempt() -> (Attempt, ScoreBreakdown) {
        let start = chrono::Utc::now();
        let mut attempt = Attempt::with_key("test-7", start, "key-abc");
        attempt.answers.insert("q1".into(), "A".into());
        attempt.answers.insert("q2".into(), "wrong".into());
        let key = AnswerKey::new(vec![KeyEntry::new("q1", "a"), KeyEntry::new("q2", "b")]);
        let provisional = score(&attempt.answers, &key);
        (
            attempt.frozen_at(start + chrono::Duration::seconds(42)),
            provisional,
        )
    }

    fn layer(
        transport: &Arc<ScriptedSubmissionTransport>,
        max_attempts: u32,
    ) -> ReconciliationLayer<Arc<ScriptedSubmissionTransport>> {
        ReconciliationLayer::new(
            Arc::clone(transport),
            RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn request_carries_key_answers_and_time() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        let (attempt, provisional) = frozen_attempt();
        layer(&transport, 1)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        let (target, request) = &sent[0];
        assert_eq!(target.path(), "/tools/tests/7/submit");
        assert_eq!(request.attempt_id, "key-abc");
        assert_eq!(request.score, Some(1));
        assert_eq!(request.max_score, Some(2));
        assert_eq!(request.time_spent_seconds, 42);
        assert_eq!(request.answers.get("q1").map(String::as_str), Some("A"));
    }

    #[tokio::test]
    async fn server_score_overrides_provisional() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        transport.queue_receipt(SubmissionReceipt {
            score: Some(2),
            max_score: Some(2),
        });
        let (attempt, provisional) = frozen_attempt();
        let result = layer(&transport, 1)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap();

        assert!(result.overridden);
        let authoritative = result.authoritative.unwrap();
        assert_eq!((authoritative.total, authoritative.max), (2, 2));
        assert_eq!(authoritative.source, ScoreSource::Server);
        assert_eq!(result.provisional.unwrap().total, 1);
    }

    #[tokio::test]
    async fn bare_acknowledgement_confirms_provisional() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        let (attempt, provisional) = frozen_attempt();
        let result = layer(&transport, 1)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap();

        assert!(!result.overridden);
        assert_eq!(
            result.authoritative.map(|a| (a.total, a.source)),
            Some((1, ScoreSource::Confirmed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reuse_the_same_key() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        transport.queue_error(TransportError::network("connection reset"));
        transport.queue_error(TransportError::server_error("502 Bad Gateway"));
        let (attempt, provisional) = frozen_attempt();

        let result = layer(&transport, 4)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        let keys: Vec<String> = transport
            .requests()
            .into_iter()
            .map(|(_, r)| r.attempt_id)
            .collect();
        assert_eq!(keys, vec!["key-abc"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_provisional() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        for _ in 0..3 {
            transport.queue_error(TransportError::network("offline"));
        }
        let (attempt, provisional) = frozen_attempt();

        let err = layer(&transport, 3)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap_err();

        let ReconcileError::SubmissionFailed {
            attempts,
            last_error,
            provisional: kept,
        } = err;
        assert_eq!(attempts, 3);
        assert_eq!(last_error.kind, TransportErrorKind::Network);
        assert_eq!(kept, Some(provisional));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        transport.queue_error(TransportError::invalid_request("unknown test"));
        let (attempt, provisional) = frozen_attempt();

        let err = layer(&transport, 4)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::SubmissionFailed { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_is_honored() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        transport.queue_error(
            TransportError::rate_limit("slow down").with_retry_after(Duration::from_secs(30)),
        );
        let (attempt, provisional) = frozen_attempt();

        let started = tokio::time::Instant::now();
        layer(&transport, 2)
            .submit(&SubmitTarget::practice_test(7), &attempt, Some(&provisional))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn confirmed_attempt_is_not_sent_twice() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        let (attempt, provisional) = frozen_attempt();
        let layer = layer(&transport, 1);
        let target = SubmitTarget::practice_test(7);

        let first = layer.submit(&target, &attempt, Some(&provisional)).await.unwrap();
        let second = layer.submit(&target, &attempt, Some(&provisional)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn unscored_sessions_have_no_authoritative_score() {
        let transport = Arc::new(ScriptedSubmissionTransport::new());
        let attempt = Attempt::new("focus-1", chrono::Utc::now());
        let result = layer(&transport, 1)
            .submit(&SubmitTarget::study_timer(1), &attempt, None)
            .await
            .unwrap();
        assert_eq!(result.authoritative, None);
        assert_eq!(transport.requests()[0].1.score, None);
    }

    #[test]
    fn receipt_accepts_nested_and_flat_shapes() {
        let flat: SubmissionReceipt =
            serde_json::from_str(r#"{"score":3,"max_score":4}"#).unwrap();
        let nested: SubmissionReceipt =
            serde_json::from_str(r#"{"attempt":{"id":9,"score":3,"max_score":4}}"#).unwrap();
        let bare: SubmissionReceipt = serde_json::from_str(r#"{"message":"ok"}"#).unwrap();
        assert_eq!(flat, nested);
        assert_eq!(flat.score, Some(3));
        assert_eq!(bare, SubmissionReceipt::default());
    }

    #[test]
    fn target_paths_and_methods() {
        let timer = SubmitTarget::study_timer(5);
        assert_eq!(timer.path(), "/tools/timer/sessions/5/complete");
        assert_eq!(timer.method(), &Method::PUT);

        let test = SubmitTarget::practice_test(7);
        assert_eq!(test.path(), "/tools/tests/7/submit");
        assert_eq!(test.method(), &Method::POST);
        assert_eq!(SubmitTarget::new("custom/x").path(), "/custom/x");
    }
}
