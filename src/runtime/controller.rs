//! Timed session controller

use super::{SessionError, SessionSnapshot};
use crate::attempt::Attempt;
use crate::reconcile::{ReconcileError, Reconciled, ReconciliationLayer};
use crate::scoring::{self, ScoreBreakdown};
use crate::state_machine::{
    transition, Effect, Event, SessionContext, SessionState, SessionStatus, TransitionError,
};
use crate::timing::{DeadlineClock, SharedClock};
use crate::transport::SubmissionTransport;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Floor for the expiry check period; `tokio::time::interval` rejects zero.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// How a settlement request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// This call closed the attempt and the server confirmed it
    Settled(Reconciled),
    /// Another trigger closed the attempt first; nothing was sent
    AlreadyLatched,
    /// The deadline has not been reached
    NotDue,
}

/// Runs one timed session from start to settlement.
///
/// Whichever comes first of [`submit`](Self::submit) and the deadline
/// closes the attempt; the other becomes a no-op. Must be started from
/// within a Tokio runtime.
pub struct TimedSessionController<T: SubmissionTransport + 'static> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: SubmissionTransport> {
    context: SessionContext,
    clock: SharedClock,
    reconciler: Arc<ReconciliationLayer<T>>,
    tick_interval: Duration,
    core: Mutex<Core>,
    snapshots: watch::Sender<SessionSnapshot>,
}

#[derive(Default)]
struct Core {
    state: SessionState,
    deadline: Option<DeadlineClock>,
    ticker: Option<CancellationToken>,
}

/// What one dispatched event asked the caller to do
struct Dispatched {
    ignored: bool,
    submit: Option<(Attempt, Option<ScoreBreakdown>)>,
}

impl<T: SubmissionTransport + 'static> TimedSessionController<T> {
    /// `tick_interval` is clamped to at least one millisecond.
    pub fn new(
        context: SessionContext,
        clock: SharedClock,
        reconciler: Arc<ReconciliationLayer<T>>,
        tick_interval: Duration,
    ) -> Self {
        let tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        let snapshot = SessionSnapshot::of(&context.session_id, &SessionState::Idle);
        let (snapshots, _) = watch::channel(snapshot);
        Self {
            inner: Arc::new(Inner {
                context,
                clock,
                reconciler,
                tick_interval,
                core: Mutex::new(Core::default()),
                snapshots,
            }),
        }
    }

    /// Open the attempt and arm the deadline. Returns the deadline.
    pub fn start(&self) -> Result<DateTime<Utc>, SessionError> {
        self.inner.start()
    }

    pub fn set_answer(
        &self,
        question_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut core = inner.lock();
        let at = inner.clock.now();
        inner.dispatch(
            &mut core,
            Event::AnswerChanged {
                question_id: question_id.into(),
                value: value.into(),
                at,
            },
        )?;
        Ok(())
    }

    /// Live score of the current answers, or the frozen score once closed
    pub fn preview_score(&self) -> Option<ScoreBreakdown> {
        let core = self.inner.lock();
        match &core.state {
            SessionState::Running { attempt, .. } => self
                .inner
                .context
                .answer_key
                .as_ref()
                .map(|key| scoring::score(&attempt.answers, key)),
            state => state.provisional().cloned(),
        }
    }

    /// Time left while running
    pub fn remaining(&self) -> Option<Duration> {
        let core = self.inner.lock();
        match (&core.state, &core.deadline) {
            (SessionState::Running { .. }, Some(clock)) => Some(clock.remaining()),
            _ => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().state.status()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Close the attempt on the user's behalf and wait for the server.
    pub async fn submit(&self) -> Result<Settlement, SessionError> {
        let dispatched = {
            let inner = &self.inner;
            let mut core = inner.lock();
            let at = inner.clock.now();
            inner.dispatch(&mut core, Event::UserSubmit { at })?
        };
        self.inner.finish(dispatched).await
    }

    /// Settle now if the deadline has passed.
    ///
    /// The ticker calls this periodically; callers may also call it after a
    /// suspension instead of waiting for the next tick.
    pub async fn check_expiry(&self) -> Result<Settlement, SessionError> {
        self.inner.check_expiry().await
    }

    /// Re-send a submission whose retries were exhausted.
    pub async fn retry_submission(&self) -> Result<Settlement, SessionError> {
        let dispatched = {
            let mut core = self.inner.lock();
            let dispatched = self.inner.dispatch(&mut core, Event::RetrySubmission)?;
            if dispatched.ignored {
                if let Some(outcome) = core.state.outcome() {
                    return Ok(Settlement::Settled(outcome.clone()));
                }
            }
            dispatched
        };
        self.inner.finish(dispatched).await
    }

    /// Stop the ticker. A session disposed while running never settles.
    pub fn dispose(&self) {
        let mut core = self.inner.lock();
        if let Some(ticker) = core.ticker.take() {
            ticker.cancel();
        }
        core.deadline = None;
        if matches!(core.state, SessionState::Running { .. }) {
            tracing::warn!(
                session_id = %self.inner.context.session_id,
                "Session disposed before settlement"
            );
        }
    }
}

impl<T: SubmissionTransport + 'static> Drop for TimedSessionController<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: SubmissionTransport + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>) -> Result<DateTime<Utc>, SessionError> {
        let mut core = self.lock();
        if !matches!(core.state, SessionState::Idle) {
            return Err(TransitionError::AlreadyStarted.into());
        }

        let clock = DeadlineClock::start(Arc::clone(&self.clock), self.context.duration);
        let deadline = clock.deadline();
        let attempt = Attempt::new(self.context.session_id.clone(), clock.started_at());
        core.deadline = Some(clock);
        self.dispatch(&mut core, Event::Start { attempt, deadline })?;

        tracing::info!(
            session_id = %self.context.session_id,
            kind = ?self.context.kind,
            duration_secs = self.context.duration.as_secs(),
            %deadline,
            "Session started"
        );
        Ok(deadline)
    }

    /// Apply one event under the lock and run its synchronous effects.
    /// Submissions are handed back to the caller to run without the lock.
    fn dispatch(
        self: &Arc<Self>,
        core: &mut Core,
        event: Event,
    ) -> Result<Dispatched, TransitionError> {
        let result = transition(&core.state, &self.context, event)?;
        let ignored = result.ignored;
        core.state = result.new_state;

        let mut submit = None;
        for effect in result.effects {
            match effect {
                Effect::StartTicker { deadline } => {
                    tracing::debug!(%deadline, "Starting deadline ticker");
                    core.ticker = Some(self.spawn_ticker());
                }
                Effect::StopTicker => {
                    if let Some(ticker) = core.ticker.take() {
                        ticker.cancel();
                    }
                }
                Effect::Submit {
                    attempt,
                    provisional,
                } => submit = Some((attempt, provisional)),
                Effect::Notify => {
                    self.snapshots
                        .send_replace(SessionSnapshot::of(&self.context.session_id, &core.state));
                }
            }
        }

        if core.state.is_settled() {
            core.deadline = None;
        }
        Ok(Dispatched { ignored, submit })
    }

    async fn check_expiry(self: &Arc<Self>) -> Result<Settlement, SessionError> {
        let dispatched = {
            let mut core = self.lock();
            let due = match (&core.state, &core.deadline) {
                (SessionState::Running { .. }, Some(clock)) => clock.expired(),
                _ => false,
            };
            if !due {
                return Ok(if core.state.is_latched() {
                    Settlement::AlreadyLatched
                } else {
                    Settlement::NotDue
                });
            }
            let at = self.clock.now();
            tracing::info!(session_id = %self.context.session_id, "Deadline reached");
            self.dispatch(&mut core, Event::ClockExpired { at })?
        };
        self.finish(dispatched).await
    }

    /// Run the submission a dispatch asked for and feed back its outcome.
    async fn finish(self: &Arc<Self>, dispatched: Dispatched) -> Result<Settlement, SessionError> {
        let Some((attempt, provisional)) = dispatched.submit else {
            return Ok(if dispatched.ignored {
                Settlement::AlreadyLatched
            } else {
                Settlement::NotDue
            });
        };

        let result = self
            .reconciler
            .submit(&self.context.target, &attempt, provisional.as_ref())
            .await;

        let mut core = self.lock();
        match result {
            Ok(outcome) => {
                let confirmed = Event::SubmissionConfirmed {
                    outcome: outcome.clone(),
                };
                if let Err(e) = self.dispatch(&mut core, confirmed) {
                    tracing::error!(
                        session_id = %self.context.session_id,
                        error = %e,
                        "Confirmation rejected by session state"
                    );
                    return Err(e.into());
                }
                Ok(Settlement::Settled(outcome))
            }
            Err(e) => {
                let ReconcileError::SubmissionFailed {
                    attempts,
                    last_error,
                    ..
                } = &e;
                self.dispatch(
                    &mut core,
                    Event::SubmissionFailed {
                        message: last_error.to_string(),
                        attempts: *attempts,
                    },
                )?;
                Err(e.into())
            }
        }
    }

    /// Periodic deadline check. Holds only a weak reference so it never
    /// keeps a dropped controller alive.
    fn spawn_ticker(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                match inner.check_expiry().await {
                    Ok(Settlement::NotDue) => {}
                    Ok(_) => break,
                    Err(e) => {
                        tracing::error!(
                            session_id = %inner.context.session_id,
                            error = %e,
                            "Settlement after expiry failed"
                        );
                        break;
                    }
                }
            }
            tracing::debug!("Deadline ticker stopped");
        });
        token
    }
}
