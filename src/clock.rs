//! Wall-clock source shared by the session and lockout components.
//!
//! `TokioClock` anchors a wall-clock reading to `tokio::time::Instant` once and
//! derives every later reading from the monotonic clock. Under a paused tokio
//! runtime (`start_paused = true`, `tokio::time::advance`) wall time moves with
//! virtual time, so timers and expiry arithmetic never disagree in tests.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Plain system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock whose first reading is `wall_anchor`.
    #[must_use]
    pub fn starting_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }

    #[must_use]
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.mono_anchor);
        self.wall_anchor + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX)
    }
}

/// Non-negative duration from `now` until `deadline`.
#[must_use]
pub fn until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> std::time::Duration {
    (deadline - now).to_std().unwrap_or_default()
}
