//! Login coordinator: feeds each outcome into both the session and the
//! lockout controller.

use crate::{
    backend::{IdentityBackend, IdentitySummary},
    error::{BackendError, SessionError},
    lockout::{FailureKind, LockoutController},
    session::SessionManager,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct LoginFlow {
    backend: Arc<dyn IdentityBackend>,
    session: SessionManager,
    lockout: LockoutController,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        session: SessionManager,
        lockout: LockoutController,
    ) -> Self {
        Self {
            backend,
            session,
            lockout,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutController {
        &self.lockout
    }

    /// Log in, unless `username` is locked client-side.
    ///
    /// # Errors
    /// `LockoutActive` when locked (before or because of this attempt),
    /// `LoginFailed` with the classified reason when the backend refuses,
    /// `NetworkFailure` when the backend cannot be reached. Network failures
    /// leave lockout state untouched.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<IdentitySummary, SessionError> {
        self.lockout.ensure_unlocked(username)?;

        match self.backend.login(username, password).await {
            Ok(grant) => {
                self.lockout.record_success();
                self.session.adopt_credentials(grant.tokens);

                info!("login succeeded");

                Ok(grant.user.unwrap_or_else(|| IdentitySummary {
                    username: username.to_string(),
                    ..IdentitySummary::default()
                }))
            }
            Err(err @ BackendError::Rejected { .. }) if !err.is_transient() => {
                let message = err.reason().to_string();
                let kind = self.lockout.record_failure(username, &message);

                warn!(%kind, "login rejected");

                if let FailureKind::TemporarilyLocked { .. } = kind {
                    self.lockout.ensure_unlocked(username)?;
                }

                Err(SessionError::LoginFailed { kind, message })
            }
            Err(err) => Err(SessionError::NetworkFailure(err.to_string())),
        }
    }
}
