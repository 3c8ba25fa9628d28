use crate::{backend::TokenGrant, clock, error::SessionError, storage::Storage};
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Renewal starts this long before the backend would reject the credential.
pub const SAFETY_MARGIN_SECONDS: i64 = 300;

pub const CREDENTIALS_KEY: &str = "auth_tokens";
/// Single bare access token written by older clients.
pub const LEGACY_TOKEN_KEY: &str = "jwe_token";

#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Absent only for a credential adopted from the legacy key.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// Build the set minted by `grant` at `issued_at`. When the grant carries
    /// no renewal credential, `previous_refresh` is kept.
    #[must_use]
    pub fn from_grant(
        grant: TokenGrant,
        previous_refresh: Option<SecretString>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let lifetime = i64::try_from(grant.expires_in).unwrap_or(i64::MAX);
        let expires_at = issued_at
            + TimeDelta::seconds(lifetime.saturating_sub(SAFETY_MARGIN_SECONDS));

        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh),
            expires_at: Some(expires_at),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| now >= expires_at)
    }

    #[must_use]
    pub fn access(&self) -> AccessCredential {
        AccessCredential {
            token: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Restore from `auth_tokens`, falling back to (and migrating) the legacy
    /// key. Unreadable records are discarded.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the substrate itself fails.
    pub fn load(storage: &dyn Storage) -> Result<Option<Self>, SessionError> {
        if let Some(raw) = storage.get(CREDENTIALS_KEY)? {
            match serde_json::from_str::<StoredCredentials>(&raw) {
                Ok(stored) if !stored.access_token.trim().is_empty() => {
                    return Ok(Some(stored.into()));
                }
                Ok(_) => warn!("discarding stored credentials without an access token"),
                Err(err) => warn!("discarding unreadable stored credentials: {}", err),
            }
            storage.remove(CREDENTIALS_KEY)?;
        }

        let Some(legacy) = storage.get(LEGACY_TOKEN_KEY)? else {
            return Ok(None);
        };

        // Older clients stored the bare token, some JSON-quoted.
        let token = serde_json::from_str::<String>(&legacy).unwrap_or(legacy);
        let token = token.trim();
        if token.is_empty() {
            storage.remove(LEGACY_TOKEN_KEY)?;
            return Ok(None);
        }

        info!("migrating legacy access token");

        let set = Self {
            access_token: SecretString::from(token.to_string()),
            refresh_token: None,
            expires_at: None,
        };
        set.save(storage)?;
        storage.remove(LEGACY_TOKEN_KEY)?;

        Ok(Some(set))
    }

    /// # Errors
    /// Returns `SessionError::Storage` if the record cannot be written.
    pub fn save(&self, storage: &dyn Storage) -> Result<(), SessionError> {
        let stored = StoredCredentials {
            access_token: self.access_token.expose_secret().to_string(),
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|token| token.expose_secret().to_string()),
            expire_time: self.expires_at,
        };

        let value = serde_json::to_string(&stored)
            .map_err(|err| SessionError::Unexpected(format!("credential record: {err}")))?;

        debug!("persisting credentials");
        storage.set(CREDENTIALS_KEY, &value)
    }

    /// Remove both the structured and the legacy record.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if a record cannot be removed.
    pub fn clear(storage: &dyn Storage) -> Result<(), SessionError> {
        storage.remove(CREDENTIALS_KEY)?;
        storage.remove(LEGACY_TOKEN_KEY)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expire_time: Option<DateTime<Utc>>,
}

impl From<StoredCredentials> for CredentialSet {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored
                .refresh_token
                .filter(|token| !token.trim().is_empty())
                .map(SecretString::from),
            expires_at: stored.expire_time,
        }
    }
}

/// What request signing is allowed to see.
#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PartialEq for AccessCredential {
    fn eq(&self, other: &Self) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
            && self.expires_at == other.expires_at
    }
}

impl Eq for AccessCredential {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_tokens: bool,
    /// True when `now >= expires_at`, or when the expiry is unknown.
    pub is_expired: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub time_until_expiry: Duration,
}

impl TokenStatus {
    #[must_use]
    pub fn of(set: Option<&CredentialSet>, now: DateTime<Utc>) -> Self {
        let Some(set) = set else {
            return Self::default();
        };

        Self {
            has_tokens: true,
            is_expired: set.is_expired(now),
            expires_at: set.expires_at,
            time_until_expiry: set
                .expires_at
                .map(|expires_at| clock::until(now, expires_at))
                .unwrap_or_default(),
        }
    }
}
