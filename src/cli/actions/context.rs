use crate::{
    backend::HttpIdentityBackend,
    cli::globals::GlobalArgs,
    clock::TokioClock,
    config::ClientConfig,
    lockout::{LockoutController, NoopNavigationGuard},
    login::LoginFlow,
    session::SessionManager,
    storage::FileStorage,
};
use anyhow::{Context as _, Result};
use std::sync::Arc;
use tracing::debug;

/// Everything an action needs, wired against the HTTP backend and the state
/// directory.
pub struct Context {
    pub config: ClientConfig,
    pub backend: Arc<HttpIdentityBackend>,
    pub session: SessionManager,
    pub lockout: LockoutController,
}

impl Context {
    /// Must be called inside the runtime; restoring a session may arm timers.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the state
    /// directory cannot be opened.
    pub fn build(globals: &GlobalArgs) -> Result<Self> {
        let config = globals.config()?;

        let storage = Arc::new(
            FileStorage::open(&config.state_dir).context("Failed to open state directory")?,
        );
        let clock = TokioClock::shared();
        let backend = Arc::new(HttpIdentityBackend::new(config.clone())?);

        debug!(api_url = %config.api_base_url, "client configured");

        let session = SessionManager::new(backend.clone(), storage.clone(), clock.clone());
        // A terminal has nothing to veto navigation with.
        let lockout = LockoutController::new(storage, clock, Arc::new(NoopNavigationGuard));

        Ok(Self {
            config,
            backend,
            session,
            lockout,
        })
    }

    #[must_use]
    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(
            self.backend.clone(),
            self.session.clone(),
            self.lockout.clone(),
        )
    }
}
