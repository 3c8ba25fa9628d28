use crate::config::{default_state_dir, normalize_value, ClientConfig, DEFAULT_TIMEOUT_SECONDS};
use anyhow::Result;
use std::{path::PathBuf, time::Duration};

/// Options shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalArgs {
    pub api_url: String,
    pub state_dir: PathBuf,
    pub timeout: Duration,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            state_dir: default_state_dir(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_state_dir(mut self, state_dir: Option<&str>) -> Self {
        if let Some(dir) = state_dir.and_then(normalize_value) {
            self.state_dir = PathBuf::from(dir);
        }
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: Option<u64>) -> Self {
        if let Some(seconds) = seconds {
            self.timeout = Duration::from_secs(seconds);
        }
        self
    }

    /// # Errors
    /// Returns an error if the API URL is not a usable http(s) URL.
    pub fn config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::new(&self.api_url)?
            .with_request_timeout(self.timeout)
            .with_state_dir(&self.state_dir))
    }
}
