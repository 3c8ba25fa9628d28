use crate::{error::SessionError, storage::Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const LOCKOUT_RECORD_KEY: &str = "lockout_record";

/// Persisted marker that logins for `username` are blocked until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl LockoutRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Read the live record. Expired or unreadable records are removed and
    /// reported as absent.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the substrate itself fails.
    pub fn load(
        storage: &dyn Storage,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, SessionError> {
        let Some(raw) = storage.get(LOCKOUT_RECORD_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(record) if !record.is_expired(now) => Ok(Some(record)),
            Ok(record) => {
                debug!(username = %record.username, "purging expired lockout record");
                storage.remove(LOCKOUT_RECORD_KEY)?;
                Ok(None)
            }
            Err(err) => {
                warn!("discarding unreadable lockout record: {}", err);
                storage.remove(LOCKOUT_RECORD_KEY)?;
                Ok(None)
            }
        }
    }

    /// # Errors
    /// Returns `SessionError::Storage` if the record cannot be written.
    pub fn save(&self, storage: &dyn Storage) -> Result<(), SessionError> {
        let value = serde_json::to_string(self)
            .map_err(|err| SessionError::Unexpected(format!("lockout record: {err}")))?;
        storage.set(LOCKOUT_RECORD_KEY, &value)
    }

    /// # Errors
    /// Returns `SessionError::Storage` if the record cannot be removed.
    pub fn clear(storage: &dyn Storage) -> Result<(), SessionError> {
        storage.remove(LOCKOUT_RECORD_KEY)
    }
}
