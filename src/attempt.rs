//! Answers collected during a timed session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Question id to the raw value the user entered
pub type Answers = BTreeMap<String, String>;

/// A user's answers for one session.
///
/// Answers change freely until the attempt is frozen by settlement. The
/// idempotency key is generated once, here, and survives every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub session_id: String,
    pub answers: Answers,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
}

impl Attempt {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self::with_key(session_id, started_at, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_key(
        session_id: impl Into<String>,
        started_at: DateTime<Utc>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            answers: Answers::new(),
            started_at,
            submitted_at: None,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.submitted_at.is_some()
    }

    /// Copy of this attempt stamped with its submission time
    #[must_use]
    pub fn frozen_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            submitted_at: Some(at),
            ..self.clone()
        }
    }

    /// Time between start and submission, or zero while still open
    pub fn time_spent(&self) -> Duration {
        self.submitted_at
            .and_then(|at| (at - self.started_at).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}
