//! Durable key/value substrate shared by the session and lockout components.
//!
//! Every write replaces a whole record, so a reader never observes a partially
//! written value. `FileStorage` keeps one file per key under a state directory
//! and replaces it atomically: a randomly named owner-only temporary file is
//! written next to the record, synced, then renamed over it.

use crate::error::SessionError;
use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

pub trait Storage: Send + Sync {
    /// Read a record, `Ok(None)` when absent.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the substrate cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Replace a record.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the record cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    /// Remove a record; removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the record cannot be removed.
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// In-process storage, used by tests and by hosts with no durable substrate.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, SessionError> {
        self.entries
            .lock()
            .map_err(|_| SessionError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a state directory.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the directory cannot be created.
    #[instrument]
    pub fn open(dir: &Path) -> Result<Self, SessionError> {
        fs::create_dir_all(dir).map_err(|err| {
            SessionError::Storage(format!("Failed to create {}: {err}", dir.display()))
        })?;

        debug!("state directory: {}", dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, SessionError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SessionError::Storage(format!("invalid storage key: {key}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SessionError::Storage(format!(
                "Failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let path = self.path_for(key)?;
        let write_error =
            |err: std::io::Error| SessionError::Storage(format!("Failed to write {key}: {err}"));

        // Created with O_EXCL and mode 0600 under a random name.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_error)?;
        tmp.write_all(value.as_bytes()).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;

        // rename(2) replaces the entry itself, never a symlink's target.
        tmp.persist(&path).map_err(|err| {
            SessionError::Storage(format!("Failed to replace {}: {}", path.display(), err.error))
        })?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::Storage(format!(
                "Failed to remove {}: {err}",
                path.display()
            ))),
        }
    }
}
