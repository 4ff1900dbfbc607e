//! Property-based tests for the settlement latch

use super::state::SubmissionStatus;
use super::*;
use crate::attempt::Attempt;
use crate::reconcile::Reconciled;
use crate::scoring::{AnswerKey, KeyEntry};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

const DURATION_SECS: i64 = 60;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn context() -> SessionContext {
    SessionContext::exam(
        "exam",
        Duration::from_secs(60),
        AnswerKey::new(vec![
            KeyEntry::new("q1", "a"),
            KeyEntry::new("q2", "b"),
            KeyEntry::new("q3", "c"),
        ]),
    )
}

fn running() -> SessionState {
    SessionState::Running {
        attempt: Attempt::with_key("exam", t(0), "key"),
        deadline: t(DURATION_SECS),
    }
}

fn arb_trigger() -> impl Strategy<Value = Event> {
    prop_oneof![
        (0i64..90).prop_map(|s| Event::UserSubmit { at: t(s) }),
        (0i64..90).prop_map(|s| Event::ClockExpired { at: t(s) }),
        ("q[1-4]", "[a-d]", 0i64..90).prop_map(|(q, v, s)| Event::AnswerChanged {
            question_id: q,
            value: v,
            at: t(s),
        }),
    ]
}

/// Triggers mixed with submission outcomes and manual retries
fn arb_any_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        4 => arb_trigger(),
        1 => Just(Event::SubmissionFailed {
            message: "offline".into(),
            attempts: 3,
        }),
        1 => Just(Event::SubmissionConfirmed {
            outcome: Reconciled {
                idempotency_key: "key".into(),
                provisional: None,
                authoritative: None,
                overridden: false,
                attempts: 1,
            },
        }),
        1 => Just(Event::RetrySubmission),
    ]
}

fn is_settling_trigger(event: &Event) -> bool {
    match event {
        Event::UserSubmit { .. } => true,
        Event::ClockExpired { at } => *at >= t(DURATION_SECS),
        _ => false,
    }
}

proptest! {
    #[test]
    fn triggers_submit_exactly_once(events in proptest::collection::vec(arb_trigger(), 0..40)) {
        let ctx = context();
        let mut state = running();
        let mut submits = 0;

        for event in &events {
            if let Ok(result) = transition(&state, &ctx, event.clone()) {
                submits += result
                    .effects
                    .iter()
                    .filter(|e| matches!(e, Effect::Submit { .. }))
                    .count();
                state = result.new_state;
            }
        }

        let expected = usize::from(events.iter().any(is_settling_trigger));
        prop_assert_eq!(submits, expected);
    }

    #[test]
    fn submitted_answers_are_those_at_the_latch(
        events in proptest::collection::vec(arb_trigger(), 0..40),
    ) {
        let ctx = context();
        let mut state = running();
        let mut submitted = None;

        for event in events {
            let before = state.attempt().map(|a| a.answers.clone());
            if let Ok(result) = transition(&state, &ctx, event) {
                if let Some((attempt, _)) = result.submission() {
                    prop_assert_eq!(Some(&attempt.answers), before.as_ref());
                    submitted = Some(attempt.clone());
                }
                state = result.new_state;
            }
        }

        if let Some(attempt) = submitted {
            prop_assert!(state.is_latched());
            prop_assert_eq!(state.attempt(), Some(&attempt));
            prop_assert!(attempt.submitted_at.is_some_and(|at| at <= t(DURATION_SECS)));
        }
    }

    #[test]
    fn never_leaves_the_latch(events in proptest::collection::vec(arb_any_event(), 0..60)) {
        let ctx = context();
        let mut state = running();
        let mut latched = false;
        let mut settled_count = 0;
        let mut in_flight = 0usize;

        for event in events {
            let was_settled = state.is_settled();
            let Ok(result) = transition(&state, &ctx, event) else { continue };
            let submits = result
                .effects
                .iter()
                .filter(|e| matches!(e, Effect::Submit { .. }))
                .count();
            prop_assert!(submits <= 1);
            // no submission is requested while another is outstanding
            if submits == 1 {
                prop_assert_eq!(in_flight, 0);
            }
            in_flight += submits;
            if matches!(
                result.new_state,
                SessionState::Finalizing { submission: SubmissionStatus::Failed { .. }, .. }
                    | SessionState::Settled { .. }
            ) {
                in_flight = 0;
            }

            state = result.new_state;
            if latched {
                prop_assert!(state.is_latched());
            }
            latched |= state.is_latched();
            if state.is_settled() && !was_settled {
                settled_count += 1;
            }
        }
        prop_assert!(settled_count <= 1);
    }
}
