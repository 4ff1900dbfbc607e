//! Events that drive a timed session

use crate::attempt::Attempt;
use crate::reconcile::Reconciled;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum Event {
    /// Open a fresh attempt that must close by `deadline`
    Start {
        attempt: Attempt,
        deadline: DateTime<Utc>,
    },

    AnswerChanged {
        question_id: String,
        value: String,
        at: DateTime<Utc>,
    },

    UserSubmit {
        at: DateTime<Utc>,
    },

    /// Periodic check observed `at >= deadline`
    ClockExpired {
        at: DateTime<Utc>,
    },

    SubmissionConfirmed {
        outcome: Reconciled,
    },

    SubmissionFailed {
        message: String,
        attempts: u32,
    },

    /// Manual retry after a failed submission
    RetrySubmission,
}
