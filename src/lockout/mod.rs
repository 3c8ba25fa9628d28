//! Lockout countdown controller.
//!
//! After the identity service reports a temporary lockout, logins for that
//! identity are refused client-side until the lock lifts. The lock is kept as
//! an absolute expiry instant, persisted so it survives a restart, and the
//! remaining time is always recomputed from the wall clock rather than
//! decremented. While locked, a one-second ticker publishes `LockoutStatus`
//! snapshots through a `watch` channel and collapses the lock once it expires.
//!
//! Flow Overview:
//! 1. `record_failure` classifies the backend message; a lockout message
//!    persists a `LockoutRecord` and enters `Locked`.
//! 2. `new` resumes a persisted, still-live record; expired ones are purged.
//! 3. The ticker (or any `status` read past the expiry) clears the record,
//!    releases the navigation guard and returns to `Unlocked`.
//! 4. `record_success` unlocks immediately.

mod classify;
mod guard;
mod record;

pub use classify::{classify_failure, FailureKind, DEFAULT_LOCKOUT_SECONDS};
pub use guard::{NavigationGuard, NoopNavigationGuard};
pub use record::{LockoutRecord, LOCKOUT_RECORD_KEY};

use crate::{
    backend::IdentityBackend,
    clock::Clock,
    error::{BackendError, SessionError},
    storage::Storage,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::watch,
    task::AbortHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockoutState {
    Unlocked,
    Locked {
        username: String,
        expires_at: DateTime<Utc>,
    },
}

/// Read-only snapshot for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutStatus {
    pub locked: bool,
    pub username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whole seconds left, rounded up; zero when unlocked.
    pub remaining_seconds: u64,
}

impl LockoutStatus {
    fn unlocked() -> Self {
        Self::default()
    }

    fn locked(username: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            locked: true,
            username: Some(username.to_string()),
            expires_at: Some(expires_at),
            remaining_seconds: remaining_seconds(now, expires_at),
        }
    }
}

/// Snapshot of `lock` at `now`, `None` once a held lock has run out.
fn live_status(lock: &LockoutState, now: DateTime<Utc>) -> Option<LockoutStatus> {
    match lock {
        LockoutState::Locked {
            username,
            expires_at,
        } if now < *expires_at => Some(LockoutStatus::locked(username, *expires_at, now)),
        LockoutState::Locked { .. } => None,
        LockoutState::Unlocked => Some(LockoutStatus::unlocked()),
    }
}

/// Seconds until `expires_at`, rounded up so a lock never displays as 0 while
/// it is still active.
fn remaining_seconds(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> u64 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        u64::try_from(millis).unwrap_or(u64::MAX).div_ceil(1000)
    }
}

struct State {
    lock: LockoutState,
    ticker: Option<AbortHandle>,
}

struct Inner {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    guard: Arc<dyn NavigationGuard>,
    state: Mutex<State>,
    status_tx: watch::Sender<LockoutStatus>,
}

#[derive(Clone)]
pub struct LockoutController {
    inner: Arc<Inner>,
}

impl LockoutController {
    /// Build the controller and resume any live persisted lock.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        guard: Arc<dyn NavigationGuard>,
    ) -> Self {
        let (status_tx, _) = watch::channel(LockoutStatus::unlocked());

        let inner = Arc::new(Inner {
            storage,
            clock,
            guard,
            state: Mutex::new(State {
                lock: LockoutState::Unlocked,
                ticker: None,
            }),
            status_tx,
        });

        let now = inner.clock.now();
        match LockoutRecord::load(inner.storage.as_ref(), now) {
            Ok(Some(record)) => {
                info!(
                    username = %record.username,
                    remaining_seconds = remaining_seconds(now, record.expires_at),
                    "resuming lockout"
                );
                Inner::enter_locked(&inner, &record.username, record.expires_at, false);
            }
            Ok(None) => {}
            Err(err) => warn!("failed to restore lockout record: {}", err),
        }

        Self { inner }
    }

    /// Classify a failed login and lock the identity when the backend says
    /// it is temporarily locked.
    #[instrument(skip(self, message))]
    pub fn record_failure(&self, username: &str, message: &str) -> FailureKind {
        let kind = classify_failure(message);

        match kind {
            FailureKind::TemporarilyLocked { remaining_seconds } if remaining_seconds > 0 => {
                let expires_at = self.inner.clock.now() + seconds(remaining_seconds);
                info!(remaining_seconds, "account temporarily locked");
                Inner::enter_locked(&self.inner, username, expires_at, true);
            }
            FailureKind::AttemptsRemaining { count } => {
                debug!(count, "login failed, attempts remaining");
            }
            _ => debug!(%kind, "login failed"),
        }

        kind
    }

    /// A login succeeded: drop any lock immediately.
    pub fn record_success(&self) {
        self.inner.unlock();
    }

    #[must_use]
    pub fn status(&self) -> LockoutStatus {
        self.inner.refresh()
    }

    #[must_use]
    pub fn state(&self) -> LockoutState {
        self.inner.refresh();
        self.inner.state().lock.clone()
    }

    /// Snapshots published on every tick and transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockoutStatus> {
        self.inner.status_tx.subscribe()
    }

    /// # Errors
    /// Returns `SessionError::LockoutActive` while `username` is locked.
    /// Usernames compare case-insensitively, like the directory does.
    pub fn ensure_unlocked(&self, username: &str) -> Result<(), SessionError> {
        let status = self.status();

        match status.username {
            Some(locked) if status.locked && locked.eq_ignore_ascii_case(username) => {
                Err(SessionError::LockoutActive {
                    username: locked,
                    remaining_seconds: status.remaining_seconds,
                })
            }
            _ => Ok(()),
        }
    }

    /// Ask the backend whether `username` is locked, but only when nothing is
    /// known locally. Used on cold start.
    ///
    /// # Errors
    /// Returns the backend failure, mapped into `SessionError`.
    #[instrument(skip(self, backend))]
    pub async fn resume_from_backend(
        &self,
        backend: &dyn IdentityBackend,
        username: &str,
    ) -> Result<LockoutStatus, SessionError> {
        let current = self.status();
        if current.locked {
            return Ok(current);
        }

        let probe = backend
            .lockout_status(username)
            .await
            .map_err(BackendError::into_request_failure)?;

        if probe.locked && probe.remaining_seconds > 0 {
            let expires_at = self.inner.clock.now() + seconds(probe.remaining_seconds);
            info!(
                remaining_seconds = probe.remaining_seconds,
                "backend reports lockout"
            );
            Inner::enter_locked(&self.inner, username, expires_at, true);
        }

        Ok(self.status())
    }
}

fn seconds(value: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter_locked(
        inner: &Arc<Self>,
        username: &str,
        expires_at: DateTime<Utc>,
        persist: bool,
    ) {
        let now = inner.clock.now();

        let engage = {
            let mut state = inner.state();
            let engage = match &state.lock {
                LockoutState::Locked { username: held, .. } => held != username,
                LockoutState::Unlocked => true,
            };

            state.lock = LockoutState::Locked {
                username: username.to_string(),
                expires_at,
            };

            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
            state.ticker = spawn_ticker(inner);

            // Record and snapshot change under the guard so they follow
            // state order.
            if persist {
                let record = LockoutRecord {
                    username: username.to_string(),
                    expires_at,
                };
                if let Err(err) = record.save(inner.storage.as_ref()) {
                    warn!("failed to persist lockout record: {}", err);
                }
            }
            inner.publish(LockoutStatus::locked(username, expires_at, now));

            engage
        };

        if engage {
            inner.guard.engage(username);
        }
    }

    /// Current snapshot, collapsing an expired lock first.
    fn refresh(&self) -> LockoutStatus {
        let now = self.clock.now();

        let (status, expired) = {
            let mut state = self.state();
            match live_status(&state.lock, now) {
                Some(status) => (status, false),
                None => (LockoutStatus::unlocked(), self.clear(&mut state)),
            }
        };

        if expired {
            debug!("lockout expired");
            self.guard.release();
        }

        status
    }

    /// Countdown step. Returns whether the lock is still held.
    fn tick(&self) -> bool {
        let now = self.clock.now();

        let expired = {
            let mut state = self.state();
            match live_status(&state.lock, now) {
                Some(status) if status.locked => {
                    self.publish(status);
                    return true;
                }
                Some(_) => return false,
                None => self.clear(&mut state),
            }
        };

        if expired {
            debug!("lockout expired");
            self.guard.release();
        }

        false
    }

    fn unlock(&self) {
        let was_locked = {
            let mut state = self.state();
            self.clear(&mut state)
        };

        if was_locked {
            self.guard.release();
        }
    }

    /// Drop the lock, its ticker and its record. Returns whether a lock was
    /// held.
    fn clear(&self, state: &mut State) -> bool {
        let was_locked = matches!(state.lock, LockoutState::Locked { .. });

        state.lock = LockoutState::Unlocked;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        if let Err(err) = LockoutRecord::clear(self.storage.as_ref()) {
            warn!("failed to clear lockout record: {}", err);
        }
        if was_locked {
            self.publish(LockoutStatus::unlocked());
        }

        was_locked
    }

    fn publish(&self, status: LockoutStatus) {
        self.status_tx.send_replace(status);
    }
}

/// One-second countdown. Holds only a weak reference so a dropped controller
/// stops ticking.
fn spawn_ticker(inner: &Arc<Inner>) -> Option<AbortHandle> {
    let Ok(runtime) = Handle::try_current() else {
        debug!("no runtime, countdown is computed on read only");
        return None;
    };

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let mut ticks = interval_at(Instant::now() + TICK, TICK);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let task = runtime.spawn(async move {
        loop {
            ticks.tick().await;

            let Some(inner) = weak.upgrade() else {
                break;
            };

            if !inner.tick() {
                break;
            }
        }
    });

    Some(task.abort_handle())
}
