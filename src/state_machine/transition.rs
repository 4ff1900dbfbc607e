//! Pure state transition function

use super::state::SubmissionStatus;
use super::{Effect, Event, SessionContext, SessionState, SettlementTrigger};
use crate::attempt::Attempt;
use crate::scoring;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
    /// The event arrived after the latch and changed nothing
    pub ignored: bool,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
            ignored: false,
        }
    }

    pub fn ignored(state: &SessionState) -> Self {
        Self {
            new_state: state.clone(),
            effects: vec![],
            ignored: true,
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// The submission this transition asks for, if any
    pub fn submission(&self) -> Option<(&Attempt, Option<&scoring::ScoreBreakdown>)> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::Submit {
                attempt,
                provisional,
            } => Some((attempt, provisional.as_ref())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Session has not been started")]
    NotStarted,
    #[error("Session has already been started")]
    AlreadyStarted,
    #[error("Attempt is closed; answers can no longer change")]
    AttemptFrozen,
    #[error("Deadline has passed")]
    DeadlinePassed,
    #[error("Unknown question: {0}")]
    UnknownQuestion(String),
    #[error("A submission is already in flight")]
    SubmissionInFlight,
    /// A settlement arrived for a session that was not waiting for one
    #[error("Settlement latch violated: session settled twice")]
    DoubleSettlementAttempt,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function: no I/O, no clock reads.
#[allow(clippy::too_many_lines)] // one arm per (state, event) pair
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Start
        // ============================================================
        (SessionState::Idle, Event::Start { attempt, deadline }) => {
            Ok(
                TransitionResult::new(SessionState::Running { attempt, deadline })
                    .with_effect(Effect::StartTicker { deadline })
                    .with_effect(Effect::Notify),
            )
        }
        (_, Event::Start { .. }) => Err(TransitionError::AlreadyStarted),

        // ============================================================
        // Answers
        // ============================================================
        (
            SessionState::Running { attempt, deadline },
            Event::AnswerChanged {
                question_id,
                value,
                at,
            },
        ) => {
            if at >= *deadline {
                return Err(TransitionError::DeadlinePassed);
            }
            if let Some(key) = &context.answer_key {
                if !key.contains(&question_id) {
                    return Err(TransitionError::UnknownQuestion(question_id));
                }
            }
            let mut attempt = attempt.clone();
            attempt.answers.insert(question_id, value);
            Ok(TransitionResult::new(SessionState::Running {
                attempt,
                deadline: *deadline,
            })
            .with_effect(Effect::Notify))
        }
        (SessionState::Idle, Event::AnswerChanged { .. } | Event::UserSubmit { .. }) => {
            Err(TransitionError::NotStarted)
        }
        (_, Event::AnswerChanged { .. }) => Err(TransitionError::AttemptFrozen),

        // ============================================================
        // Settlement triggers: the first one wins
        // ============================================================
        (SessionState::Running { attempt, deadline }, Event::UserSubmit { at }) => {
            // a late submit means the deadline passed before the ticker noticed
            if at >= *deadline {
                Ok(latch(context, attempt, SettlementTrigger::Expired, *deadline))
            } else {
                Ok(latch(context, attempt, SettlementTrigger::UserSubmitted, at))
            }
        }
        (SessionState::Running { attempt, deadline }, Event::ClockExpired { at }) => {
            if at < *deadline {
                return Ok(TransitionResult::ignored(state));
            }
            Ok(latch(
                context,
                attempt,
                SettlementTrigger::Expired,
                *deadline,
            ))
        }
        (
            SessionState::Idle | SessionState::Finalizing { .. } | SessionState::Settled { .. },
            Event::ClockExpired { .. } | Event::UserSubmit { .. },
        )
        | (SessionState::Settled { .. }, Event::RetrySubmission) => {
            Ok(TransitionResult::ignored(state))
        }

        // ============================================================
        // Submission outcome
        // ============================================================
        (
            SessionState::Finalizing {
                trigger, attempt, ..
            },
            Event::SubmissionConfirmed { outcome },
        ) => {
            if outcome.idempotency_key != attempt.idempotency_key {
                return Err(TransitionError::InvalidTransition(format!(
                    "confirmation for attempt {} does not match {}",
                    outcome.idempotency_key, attempt.idempotency_key
                )));
            }
            Ok(TransitionResult::new(SessionState::Settled {
                trigger: *trigger,
                attempt: attempt.clone(),
                outcome,
            })
            .with_effect(Effect::Notify))
        }
        (_, Event::SubmissionConfirmed { .. }) => Err(TransitionError::DoubleSettlementAttempt),

        (
            SessionState::Finalizing {
                trigger,
                attempt,
                provisional,
                submission: SubmissionStatus::InFlight,
            },
            Event::SubmissionFailed { message, attempts },
        ) => Ok(TransitionResult::new(SessionState::Finalizing {
            trigger: *trigger,
            attempt: attempt.clone(),
            provisional: provisional.clone(),
            submission: SubmissionStatus::Failed { message, attempts },
        })
        .with_effect(Effect::Notify)),
        (_, Event::SubmissionFailed { .. }) => Err(TransitionError::InvalidTransition(
            "submission failure reported with no submission in flight".to_string(),
        )),

        // ============================================================
        // Manual retry
        // ============================================================
        (
            SessionState::Finalizing {
                trigger,
                attempt,
                provisional,
                submission: SubmissionStatus::Failed { .. },
            },
            Event::RetrySubmission,
        ) => Ok(TransitionResult::new(SessionState::Finalizing {
            trigger: *trigger,
            attempt: attempt.clone(),
            provisional: provisional.clone(),
            submission: SubmissionStatus::InFlight,
        })
        .with_effect(Effect::Submit {
            attempt: attempt.clone(),
            provisional: provisional.clone(),
        })
        .with_effect(Effect::Notify)),
        (
            SessionState::Finalizing {
                submission: SubmissionStatus::InFlight,
                ..
            },
            Event::RetrySubmission,
        ) => Err(TransitionError::SubmissionInFlight),
        (SessionState::Idle | SessionState::Running { .. }, Event::RetrySubmission) => Err(
            TransitionError::InvalidTransition("nothing has been submitted yet".to_string()),
        ),
    }
}

/// Freeze the attempt, score it, and ask for exactly one submission.
fn latch(
    context: &SessionContext,
    attempt: &Attempt,
    trigger: SettlementTrigger,
    at: DateTime<Utc>,
) -> TransitionResult {
    let attempt = attempt.frozen_at(at);
    let provisional = context
        .answer_key
        .as_ref()
        .map(|key| scoring::score(&attempt.answers, key));

    TransitionResult::new(SessionState::Finalizing {
        trigger,
        attempt: attempt.clone(),
        provisional: provisional.clone(),
        submission: SubmissionStatus::InFlight,
    })
    .with_effect(Effect::StopTicker)
    .with_effect(Effect::Submit {
        attempt,
        provisional,
    })
    .with_effect(Effect::Notify)
}
