//! Error taxonomy for the session core.
//!
//! `SessionError` is `Clone` because a single renewal outcome is fanned out to
//! every caller waiting on it. `BackendError` describes what the identity
//! service (or the network in front of it) did, and is mapped into
//! `SessionError` by the component that knows what the failure means.

use crate::lockout::FailureKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Renewal requested with nothing to renew with; the caller must log in.
    #[error("No renewal credential available - re-login required")]
    NoRenewalCredential,

    /// The backend refused the renewal credential; the session is gone.
    #[error("Renewal rejected: {0}")]
    RenewalRejected(String),

    /// No response could be obtained; the session is untouched.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The renewal exchange could not reach the backend. The session was
    /// destroyed all the same.
    #[error("Network failure during renewal: {0}")]
    RenewalUnreachable(String),

    /// A valid lockout record exists for this identity.
    #[error("Account {username} is locked for another {remaining_seconds}s")]
    LockoutActive {
        username: String,
        remaining_seconds: u64,
    },

    #[error("Login failed: {message}")]
    LoginFailed { kind: FailureKind, message: String },

    /// No access credential is held.
    #[error("Not authenticated - login required")]
    NotAuthenticated,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SessionError {
    /// Whether the caller has to route the user back to login.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NoRenewalCredential
                | Self::RenewalRejected(_)
                | Self::RenewalUnreachable(_)
                | Self::NotAuthenticated
        )
    }

    #[must_use]
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::RenewalUnreachable(_))
    }
}

/// Failures reported by an `IdentityBackend` or `Transport`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The service answered with a non-success status.
    #[error("Request failed ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unable to reach the server: {0}")]
    Network(String),

    #[error("Response error: {0}")]
    Parse(String),
}

impl BackendError {
    /// Server-side failures are indistinguishable from an unreachable server
    /// for the purposes of the session core.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => *status >= 500,
            Self::Network(_) | Self::Parse(_) => true,
        }
    }

    /// The human-readable reason, without the status prefix.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected { message, .. } | Self::Network(message) | Self::Parse(message) => {
                message
            }
        }
    }

    /// Mapping for calls other than renewal, where a refusal says nothing
    /// about the state of the session.
    #[must_use]
    pub fn into_request_failure(self) -> SessionError {
        if self.is_transient() {
            SessionError::NetworkFailure(self.to_string())
        } else {
            SessionError::Unexpected(self.to_string())
        }
    }
}

/// Mapping for the renewal exchange, whose failure always ends the session.
impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        if err.is_transient() {
            SessionError::RenewalUnreachable(err.to_string())
        } else {
            SessionError::RenewalRejected(err.reason().to_string())
        }
    }
}
