#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use authkeeper::{
    backend::{
        ApiRequest, ApiResponse, IdentityBackend, IdentitySummary, LockoutProbe, LoginGrant,
        TokenGrant, TokenVerification, Transport,
    },
    error::BackendError,
    lockout::NavigationGuard,
};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

/// Scriptable identity backend that counts every call.
pub struct MockBackend {
    pub logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub logouts: AtomicUsize,
    pub logout_alls: AtomicUsize,
    pub verifications: AtomicUsize,
    pub lockout_probes: AtomicUsize,
    pub refresh_delay: Duration,
    pub refresh_lifetime: u64,
    pub refresh_error: Mutex<Option<BackendError>>,
    pub logout_error: Mutex<Option<BackendError>>,
    pub login_results: Mutex<VecDeque<Result<LoginGrant, BackendError>>>,
    pub verify_results: Mutex<VecDeque<TokenVerification>>,
    pub lockout_probe: Mutex<LockoutProbe>,
    pub last_refresh_token: Mutex<Option<String>>,
    pub last_logout_all_token: Mutex<Option<String>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            logout_alls: AtomicUsize::new(0),
            verifications: AtomicUsize::new(0),
            lockout_probes: AtomicUsize::new(0),
            refresh_delay: Duration::ZERO,
            refresh_lifetime: 3600,
            refresh_error: Mutex::new(None),
            logout_error: Mutex::new(None),
            login_results: Mutex::new(VecDeque::new()),
            verify_results: Mutex::new(VecDeque::new()),
            lockout_probe: Mutex::new(LockoutProbe::default()),
            last_refresh_token: Mutex::new(None),
            last_logout_all_token: Mutex::new(None),
        }
    }
}

impl MockBackend {
    pub fn with_refresh_delay(delay: Duration) -> Self {
        Self {
            refresh_delay: delay,
            ..Self::default()
        }
    }

    pub fn fail_refresh(&self, err: BackendError) {
        *self.refresh_error.lock().unwrap() = Some(err);
    }

    pub fn fail_logout(&self, err: BackendError) {
        *self.logout_error.lock().unwrap() = Some(err);
    }

    pub fn push_login(&self, result: Result<LoginGrant, BackendError>) {
        self.login_results.lock().unwrap().push_back(result);
    }

    pub fn push_verification(&self, verification: TokenVerification) {
        self.verify_results.lock().unwrap().push_back(verification);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn rejected(status: u16, message: &str) -> BackendError {
    BackendError::Rejected {
        status,
        message: message.to_string(),
    }
}

pub fn login_grant(access: &str, refresh: &str, username: &str) -> LoginGrant {
    LoginGrant {
        tokens: TokenGrant::new(access, Some(refresh), 3600),
        user: Some(IdentitySummary {
            username: username.to_string(),
            ..IdentitySummary::default()
        }),
    }
}

#[async_trait]
impl IdentityBackend for MockBackend {
    async fn login(
        &self,
        _username: &str,
        _password: &SecretString,
    ) -> Result<LoginGrant, BackendError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.login_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(rejected(401, "Invalid credentials")))
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, BackendError> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.expose_secret().to_string());

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }

        if let Some(err) = self.refresh_error.lock().unwrap().clone() {
            return Err(err);
        }

        Ok(TokenGrant::new(
            &format!("access-{count}"),
            Some(&format!("refresh-{count}")),
            self.refresh_lifetime,
        ))
    }

    async fn logout(&self, _refresh_token: &SecretString) -> Result<(), BackendError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        match self.logout_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn logout_all(&self, access_token: &SecretString) -> Result<(), BackendError> {
        self.logout_alls.fetch_add(1, Ordering::SeqCst);
        *self.last_logout_all_token.lock().unwrap() =
            Some(access_token.expose_secret().to_string());
        match self.logout_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn verify_token(
        &self,
        _access_token: &SecretString,
    ) -> Result<TokenVerification, BackendError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TokenVerification {
                valid: true,
                expired: false,
                data: None,
            }))
    }

    async fn lockout_status(&self, _username: &str) -> Result<LockoutProbe, BackendError> {
        self.lockout_probes.fetch_add(1, Ordering::SeqCst);
        Ok(*self.lockout_probe.lock().unwrap())
    }
}

/// Transport replaying scripted responses and recording what was sent.
#[derive(Default)]
pub struct MockTransport {
    pub responses: Mutex<VecDeque<ApiResponse>>,
    pub sent: Mutex<Vec<ApiRequest>>,
    pub unreachable: bool,
}

impl MockTransport {
    pub fn replying(responses: &[ApiResponse]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().cloned().collect()),
            sent: Mutex::new(Vec::new()),
            unreachable: false,
        }
    }

    /// Every send fails before a response arrives.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::replying(&[])
        }
    }

    pub fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        self.sent.lock().unwrap().push(request.clone());
        if self.unreachable {
            return Err(BackendError::Network("connection reset".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ApiResponse::new(200, "{}")))
    }
}

/// Navigation guard counting engage/release calls.
#[derive(Default)]
pub struct RecordingGuard {
    pub engaged: AtomicUsize,
    pub released: AtomicUsize,
    pub usernames: Mutex<Vec<String>>,
}

impl NavigationGuard for RecordingGuard {
    fn engage(&self, username: &str) {
        self.engaged.fetch_add(1, Ordering::SeqCst);
        self.usernames.lock().unwrap().push(username.to_string());
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Let spawned tasks run without moving virtual time.
pub async fn run_pending() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
