//! Wall-clock deadlines
//!
//! Remaining time is always recomputed from an absolute deadline, never by
//! counting ticks, so a suspended process or a slow timer cannot drift it.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Source of "now". Swapped for [`ManualClock`] in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = add(*now, by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Countdown against a fixed absolute deadline
#[derive(Debug, Clone)]
pub struct DeadlineClock {
    clock: SharedClock,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    duration: Duration,
}

impl DeadlineClock {
    /// Record `now` as the start and fix the deadline at `now + duration`.
    pub fn start(clock: SharedClock, duration: Duration) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            started_at,
            deadline: add(started_at, duration),
            duration,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        (self.deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn elapsed(&self) -> Duration {
        (self.clock.now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn expired(&self) -> bool {
        self.clock.now() >= self.deadline
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
