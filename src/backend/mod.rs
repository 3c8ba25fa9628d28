//! Contract with the identity service.
//!
//! `IdentityBackend` covers the endpoints the session core depends on (login,
//! refresh, logout, logout-all, verify-token, lockout-status). `Transport`
//! covers every other protected call; it is what `AuthenticatedClient`
//! decorates with credential injection and expiry retry. Both have reqwest
//! implementations in [`http`]; tests substitute their own.
//!
//! Wire types deserialize into plain strings and are converted to
//! `SecretString` right away so tokens never show up in `Debug` output.

pub mod http;

use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use http::{HttpIdentityBackend, HttpTransport};

/// Lifetime assumed when the backend omits `expires_in`.
pub const DEFAULT_LIFETIME_SECONDS: u64 = 1800;

const fn default_lifetime() -> u64 {
    DEFAULT_LIFETIME_SECONDS
}

/// Credentials minted by login or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Absent when the backend keeps the current renewal credential valid.
    pub refresh_token: Option<SecretString>,
    /// Server-declared lifetime of the access token, in seconds.
    pub expires_in: u64,
}

impl TokenGrant {
    #[must_use]
    pub fn new(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> Self {
        Self {
            access_token: SecretString::from(access_token.to_string()),
            refresh_token: refresh_token.map(|token| SecretString::from(token.to_string())),
            expires_in,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenGrantWire {
    #[serde(alias = "jwe_token")]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_lifetime")]
    expires_in: u64,
}

impl From<TokenGrantWire> for TokenGrant {
    fn from(wire: TokenGrantWire) -> Self {
        Self {
            access_token: SecretString::from(wire.access_token),
            refresh_token: wire
                .refresh_token
                .filter(|token| !token.trim().is_empty())
                .map(SecretString::from),
            expires_in: wire.expires_in,
        }
    }
}

/// Who logged in, as far as the directory is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    #[serde(default, alias = "uid", alias = "sub")]
    pub username: String,
    #[serde(default, alias = "cn")]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub tokens: TokenGrant,
    pub user: Option<IdentitySummary>,
}

#[derive(Deserialize)]
pub(crate) struct LoginGrantWire {
    #[serde(flatten)]
    tokens: TokenGrantWire,
    #[serde(default)]
    user: Option<IdentitySummary>,
}

impl From<LoginGrantWire> for LoginGrant {
    fn from(wire: LoginGrantWire) -> Self {
        Self {
            tokens: wire.tokens.into(),
            user: wire.user,
        }
    }
}

/// Result of `verify-token`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenVerification {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub expired: bool,
    /// Decoded identity claims.
    #[serde(default)]
    pub data: Option<Value>,
}

/// Result of `lockout-status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LockoutProbe {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub remaining_seconds: u64,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Exchange a username and password for a credential set.
    async fn login(&self, username: &str, password: &SecretString)
        -> Result<LoginGrant, BackendError>;

    /// Mint a new access credential from a renewal credential.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, BackendError>;

    /// Revoke one renewal credential.
    async fn logout(&self, refresh_token: &SecretString) -> Result<(), BackendError>;

    /// Revoke every session of the identity owning `access_token`.
    async fn logout_all(&self, access_token: &SecretString) -> Result<(), BackendError>;

    async fn verify_token(
        &self,
        access_token: &SecretString,
    ) -> Result<TokenVerification, BackendError>;

    async fn lockout_status(&self, username: &str) -> Result<LockoutProbe, BackendError>;
}

pub const AUTHORIZATION: &str = "Authorization";

/// A protected call routed through `Transport`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub(crate) retried: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
            retried: false,
        }
    }

    #[must_use]
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: &str, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn has_authorization(&self) -> bool {
        self.header(AUTHORIZATION).is_some()
    }

    /// Replace any `Authorization` header with a bearer credential.
    pub fn set_bearer(&mut self, token: &SecretString) {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(AUTHORIZATION));
        self.headers.push((
            AUTHORIZATION.to_string(),
            format!("Bearer {}", token.expose_secret()),
        ));
    }

    /// Whether this request is already a replay after renewal.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The credential was refused, typically because it expired.
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        self.status == 401
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `BackendError::Parse` if the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_str(&self.body)
            .map_err(|err| BackendError::Parse(format!("Failed to decode response: {err}")))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. Non-success statuses are responses, not errors; only
    /// failures to obtain a response are `Err`.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        (**self).send(request).await
    }
}
