//! Credential lifecycle manager.
//!
//! `SessionManager` owns the access credential, the renewal credential and the
//! instant after which the access credential is treated as stale. It is a
//! cheap `Clone` handle over shared state; construct one per process and
//! inject it where requests are made.
//!
//! Flow Overview:
//! 1. `new` restores the persisted credential set (migrating the legacy
//!    single-token record) and arms the proactive renewal timer.
//! 2. `adopt_credentials` replaces the set after login or renewal, persists
//!    it and re-arms the timer for `expires_at` (lifetime minus a 300s margin).
//! 3. `renew` is single-flight: the first caller spawns the refresh exchange,
//!    later callers queue behind it and every caller gets the same outcome.
//! 4. A failed renewal is terminal: the set is destroyed, the timer cancelled
//!    and `SessionEvent::ReauthRequired` is broadcast.
//! 5. `logout` and `logout_all` destroy local state first, then tell the
//!    backend on a best-effort basis.

mod credentials;
mod interceptor;

pub use credentials::{
    AccessCredential, CredentialSet, TokenStatus, CREDENTIALS_KEY, LEGACY_TOKEN_KEY,
    SAFETY_MARGIN_SECONDS,
};
pub use interceptor::AuthenticatedClient;

use crate::{
    backend::{IdentityBackend, TokenGrant, TokenVerification},
    clock::{self, Clock},
    error::{BackendError, SessionError},
    storage::Storage,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, oneshot},
    task::AbortHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 16;

/// Lifecycle notifications for hosts (e.g. to route the user back to login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Renewed { expires_at: Option<DateTime<Utc>> },
    /// The session is gone; a new login is needed.
    ReauthRequired { reason: String },
    LoggedOut,
}

type RenewalResult = Result<AccessCredential, SessionError>;

/// Storage work left over once a renewal has settled.
enum Settled {
    Adopted(CredentialSet),
    Destroyed,
    Discarded,
}

struct State {
    credentials: Option<CredentialSet>,
    refreshing: bool,
    pending: Vec<oneshot::Sender<RenewalResult>>,
    /// Bumped whenever the set is replaced or destroyed, so a renewal that
    /// settles afterwards does not overwrite newer state.
    generation: u64,
    timer: Option<AbortHandle>,
}

struct Inner {
    backend: Arc<dyn IdentityBackend>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Restore persisted credentials and arm proactive renewal.
    #[must_use]
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = match CredentialSet::load(storage.as_ref()) {
            Ok(credentials) => credentials,
            Err(err) => {
                warn!("failed to restore credentials: {}", err);
                None
            }
        };

        if let Some(set) = &credentials {
            debug!(
                renewable = set.refresh_token.is_some(),
                expires_at = ?set.expires_at,
                "restored credentials"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            backend,
            storage,
            clock,
            state: Mutex::new(State {
                credentials,
                refreshing: false,
                pending: Vec::new(),
                generation: 0,
                timer: None,
            }),
            events,
        });

        Inner::schedule(&inner);

        Self { inner }
    }

    /// Replace the credential set with a fresh grant.
    pub fn adopt_credentials(&self, grant: TokenGrant) -> AccessCredential {
        Inner::adopt(&self.inner, grant)
    }

    #[must_use]
    pub fn current_access_token(&self) -> Option<SecretString> {
        self.inner
            .state()
            .credentials
            .as_ref()
            .map(|set| set.access_token.clone())
    }

    #[must_use]
    pub fn has_renewal_credential(&self) -> bool {
        self.inner
            .state()
            .credentials
            .as_ref()
            .is_some_and(|set| set.refresh_token.is_some())
    }

    /// Obtain a new access credential, sharing any renewal already in flight.
    ///
    /// # Errors
    /// `NoRenewalCredential` when there is nothing to renew with; otherwise
    /// the renewal failure, after which the session has been destroyed.
    pub async fn renew(&self) -> Result<AccessCredential, SessionError> {
        Inner::renew(&self.inner).await
    }

    /// Ask the backend whether the access credential is still good. An
    /// expired credential is renewed once and verified again.
    ///
    /// # Errors
    /// `NotAuthenticated` without an access credential, renewal failures, or
    /// backend failures.
    #[instrument(skip(self))]
    pub async fn verify_token(&self) -> Result<TokenVerification, SessionError> {
        let token = self
            .current_access_token()
            .ok_or(SessionError::NotAuthenticated)?;

        let verification = self
            .inner
            .backend
            .verify_token(&token)
            .await
            .map_err(BackendError::into_request_failure)?;

        if !verification.expired {
            return Ok(verification);
        }

        debug!("access credential expired, renewing before verifying again");
        let access = self.renew().await?;

        self.inner
            .backend
            .verify_token(&access.token)
            .await
            .map_err(BackendError::into_request_failure)
    }

    /// End this session. Local state is destroyed even if the backend cannot
    /// be reached.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let Some(set) = self.inner.destroy() else {
            debug!("logout without credentials");
            return;
        };

        let _ = self.inner.events.send(SessionEvent::LoggedOut);

        if let Some(refresh_token) = set.refresh_token {
            if let Err(err) = self.inner.backend.logout(&refresh_token).await {
                warn!("backend logout failed: {}", err);
            }
        }

        info!("logged out");
    }

    /// End every session of this identity. Local state is destroyed even if
    /// the backend cannot be reached.
    #[instrument(skip(self))]
    pub async fn logout_all(&self) {
        let Some(set) = self.inner.destroy() else {
            debug!("logout-all without credentials");
            return;
        };

        let _ = self.inner.events.send(SessionEvent::LoggedOut);

        if let Err(err) = self.inner.backend.logout_all(&set.access_token).await {
            warn!("backend logout-all failed: {}", err);
        }

        info!("logged out of all sessions");
    }

    #[must_use]
    pub fn status(&self) -> TokenStatus {
        let now = self.inner.clock.now();
        TokenStatus::of(self.inner.state().credentials.as_ref(), now)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn adopt(inner: &Arc<Self>, grant: TokenGrant) -> AccessCredential {
        let now = inner.clock.now();

        let set = {
            let mut state = inner.state();
            let previous_refresh = state
                .credentials
                .take()
                .and_then(|set| set.refresh_token);
            let set = CredentialSet::from_grant(grant, previous_refresh, now);

            state.credentials = Some(set.clone());
            state.generation = state.generation.wrapping_add(1);
            set
        };

        if let Err(err) = set.save(inner.storage.as_ref()) {
            warn!("failed to persist credentials: {}", err);
        }

        Self::schedule(inner);

        set.access()
    }

    /// Take the credential set, cancel the timer and clear storage.
    fn destroy(&self) -> Option<CredentialSet> {
        let set = {
            let mut state = self.state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation = state.generation.wrapping_add(1);
            state.credentials.take()
        };

        if let Err(err) = CredentialSet::clear(self.storage.as_ref()) {
            warn!("failed to clear stored credentials: {}", err);
        }

        set
    }

    async fn renew(inner: &Arc<Self>) -> RenewalResult {
        let (tx, rx) = oneshot::channel();

        let exchange = {
            let mut state = inner.state();

            let Some(refresh_token) = state
                .credentials
                .as_ref()
                .and_then(|set| set.refresh_token.clone())
            else {
                return Err(SessionError::NoRenewalCredential);
            };

            state.pending.push(tx);

            if state.refreshing {
                debug!(waiters = state.pending.len(), "renewal already in flight");
                None
            } else {
                state.refreshing = true;
                Some((refresh_token, state.generation))
            }
        };

        // The exchange runs in its own task so it completes even if every
        // caller stops waiting.
        if let Some((refresh_token, started)) = exchange {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                debug!("renewing access credential");
                let outcome = inner.backend.refresh(&refresh_token).await;
                Self::settle(&inner, started, outcome);
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(SessionError::Unexpected(
                "renewal ended without a result".to_string(),
            ))
        })
    }

    fn settle(inner: &Arc<Self>, started: u64, outcome: Result<TokenGrant, BackendError>) {
        let now = inner.clock.now();

        let (waiters, result, event, settled) = {
            let mut state = inner.state();
            state.refreshing = false;
            let waiters = mem::take(&mut state.pending);

            if state.generation == started {
                match outcome {
                    Ok(grant) => {
                        let previous_refresh = state
                            .credentials
                            .take()
                            .and_then(|set| set.refresh_token);
                        let set = CredentialSet::from_grant(grant, previous_refresh, now);
                        state.credentials = Some(set.clone());
                        state.generation = state.generation.wrapping_add(1);

                        let event = SessionEvent::Renewed {
                            expires_at: set.expires_at,
                        };
                        (waiters, Ok(set.access()), Some(event), Settled::Adopted(set))
                    }
                    Err(err) => {
                        let err = SessionError::from(err);
                        state.credentials = None;
                        state.generation = state.generation.wrapping_add(1);
                        if let Some(timer) = state.timer.take() {
                            timer.abort();
                        }

                        let event = SessionEvent::ReauthRequired {
                            reason: err.to_string(),
                        };
                        (waiters, Err(err), Some(event), Settled::Destroyed)
                    }
                }
            } else {
                // Logged out or logged in again while the exchange was in
                // flight; the outcome belongs to a session that is gone.
                debug!("discarding renewal outcome for a replaced session");
                let result = state
                    .credentials
                    .as_ref()
                    .map(CredentialSet::access)
                    .ok_or(SessionError::NotAuthenticated);
                (waiters, result, None, Settled::Discarded)
            }
        };

        match settled {
            Settled::Adopted(set) => {
                if let Err(err) = set.save(inner.storage.as_ref()) {
                    warn!("failed to persist credentials: {}", err);
                }
                info!(expires_at = ?set.expires_at, "access credential renewed");
                Self::schedule(inner);
            }
            Settled::Destroyed => {
                if let Err(err) = CredentialSet::clear(inner.storage.as_ref()) {
                    warn!("failed to clear stored credentials: {}", err);
                }
                if let Err(err) = &result {
                    warn!("renewal failed, re-authentication required: {}", err);
                }
            }
            Settled::Discarded => {}
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        if let Some(event) = event {
            let _ = inner.events.send(event);
        }
    }

    /// Re-arm the proactive timer for the current set. Nothing is armed
    /// without a renewal credential.
    fn schedule(inner: &Arc<Self>) {
        let now = inner.clock.now();
        let mut state = inner.state();

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let Some(set) = state.credentials.as_ref() else {
            return;
        };

        if set.refresh_token.is_none() {
            debug!("no renewal credential, proactive renewal disabled");
            return;
        }

        // Unknown expiry means renewal is due now.
        let delay = set
            .expires_at
            .map(|expires_at| clock::until(now, expires_at))
            .unwrap_or_default();

        debug!(delay_seconds = delay.as_secs(), "scheduling proactive renewal");
        state.timer = spawn_timer(inner, delay);
    }
}

fn spawn_timer(inner: &Arc<Inner>, delay: Duration) -> Option<AbortHandle> {
    let Ok(runtime) = Handle::try_current() else {
        warn!("no runtime, proactive renewal disabled");
        return None;
    };

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let deadline = Instant::now() + delay;

    let task = runtime.spawn(async move {
        if !delay.is_zero() {
            sleep_until(deadline).await;
        }

        let Some(inner) = weak.upgrade() else {
            return;
        };

        // Failures already went through the terminal path.
        if let Err(err) = Inner::renew(&inner).await {
            debug!("proactive renewal did not complete: {}", err);
        }
    });

    Some(task.abort_handle())
}
