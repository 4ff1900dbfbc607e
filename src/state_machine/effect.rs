//! Effects produced by state transitions

use crate::attempt::Attempt;
use crate::scoring::ScoreBreakdown;
use chrono::{DateTime, Utc};

/// Work the runtime performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Begin periodic deadline checks
    StartTicker { deadline: DateTime<Utc> },

    StopTicker,

    /// Hand the frozen attempt to the reconciliation layer
    Submit {
        attempt: Attempt,
        provisional: Option<ScoreBreakdown>,
    },

    /// Publish a fresh snapshot to observers
    Notify,
}
