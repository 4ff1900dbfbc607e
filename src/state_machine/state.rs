//! Session state and context

use crate::attempt::Attempt;
use crate::reconcile::{Reconciled, SubmitTarget};
use crate::scoring::{AnswerKey, ScoreBreakdown};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Timed practice test with an answer key
    Exam,
    /// Focus timer; completes with no answers and no score
    Pomodoro,
}

/// What closed the attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementTrigger {
    UserSubmitted,
    Expired,
}

/// Coarse lifecycle view exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    /// Closed by the deadline, not yet confirmed by the server
    Expired,
    /// Closed by the user, not yet confirmed by the server
    Submitted,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    InFlight,
    /// Retries exhausted; waiting for a manual retry
    Failed { message: String, attempts: u32 },
}

/// Immutable facts about a session, fixed before it starts
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub kind: SessionKind,
    pub duration: Duration,
    /// `None` when the session is not scored locally
    pub answer_key: Option<AnswerKey>,
    pub target: SubmitTarget,
}

impl SessionContext {
    pub fn exam(session_id: impl Into<String>, duration: Duration, answer_key: AnswerKey) -> Self {
        let session_id = session_id.into();
        Self {
            target: SubmitTarget::practice_test(&session_id),
            session_id,
            kind: SessionKind::Exam,
            duration,
            answer_key: Some(answer_key),
        }
    }

    pub fn pomodoro(session_id: impl Into<String>, duration: Duration) -> Self {
        let session_id = session_id.into();
        Self {
            target: SubmitTarget::study_timer(&session_id),
            session_id,
            kind: SessionKind::Pomodoro,
            duration,
            answer_key: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: SubmitTarget) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,

    Running {
        attempt: Attempt,
        deadline: DateTime<Utc>,
    },

    /// Attempt frozen; the submission is in flight or awaiting a retry
    Finalizing {
        trigger: SettlementTrigger,
        attempt: Attempt,
        provisional: Option<ScoreBreakdown>,
        submission: SubmissionStatus,
    },

    Settled {
        trigger: SettlementTrigger,
        attempt: Attempt,
        outcome: Reconciled,
    },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Running { .. } => SessionStatus::Running,
            SessionState::Finalizing {
                trigger: SettlementTrigger::Expired,
                ..
            } => SessionStatus::Expired,
            SessionState::Finalizing {
                trigger: SettlementTrigger::UserSubmitted,
                ..
            } => SessionStatus::Submitted,
            SessionState::Settled { .. } => SessionStatus::Settled,
        }
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        match self {
            SessionState::Idle => None,
            SessionState::Running { attempt, .. }
            | SessionState::Finalizing { attempt, .. }
            | SessionState::Settled { attempt, .. } => Some(attempt),
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Running { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Local score of a closed attempt
    pub fn provisional(&self) -> Option<&ScoreBreakdown> {
        match self {
            SessionState::Finalizing { provisional, .. } => provisional.as_ref(),
            SessionState::Settled { outcome, .. } => outcome.provisional.as_ref(),
            SessionState::Idle | SessionState::Running { .. } => None,
        }
    }

    pub fn outcome(&self) -> Option<&Reconciled> {
        match self {
            SessionState::Settled { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// Once past `Running`, no trigger can settle the session again
    pub fn is_latched(&self) -> bool {
        matches!(
            self,
            SessionState::Finalizing { .. } | SessionState::Settled { .. }
        )
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SessionState::Settled { .. })
    }
}
