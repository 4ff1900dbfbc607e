//! Runtime for timed sessions
//!
//! Drives the pure state machine: owns the deadline ticker, runs
//! submissions, and publishes snapshots to observers.

mod controller;

pub use controller::{Settlement, TimedSessionController};

use crate::attempt::Answers;
use crate::reconcile::{AuthoritativeScore, ReconcileError};
use crate::scoring::ScoreBreakdown;
use crate::state_machine::{SessionState, SessionStatus, SubmissionStatus, TransitionError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Submission(#[from] ReconcileError),
}

/// Point-in-time view of a session for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    /// Set while running; remaining time is derived from it, not stored
    pub deadline: Option<DateTime<Utc>>,
    pub answers: Answers,
    pub provisional: Option<ScoreBreakdown>,
    pub authoritative: Option<AuthoritativeScore>,
    /// Last submission failure while waiting for a manual retry
    pub submission_error: Option<String>,
}

impl SessionSnapshot {
    pub fn of(session_id: &str, state: &SessionState) -> Self {
        let submission_error = match state {
            SessionState::Finalizing {
                submission: SubmissionStatus::Failed { message, .. },
                ..
            } => Some(message.clone()),
            _ => None,
        };
        Self {
            session_id: session_id.to_string(),
            status: state.status(),
            deadline: state.deadline(),
            answers: state
                .attempt()
                .map(|a| a.answers.clone())
                .unwrap_or_default(),
            provisional: state.provisional().cloned(),
            authoritative: state.outcome().and_then(|o| o.authoritative),
            submission_error,
        }
    }
}
