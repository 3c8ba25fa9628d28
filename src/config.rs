//! Client configuration: where the identity service lives, how long to wait
//! for it, and where durable state is kept. Values come from CLI flags or
//! `AUTHKEEPER_*` environment variables; blank values count as unset.
//! Configuration values are not secret; do not put credentials here.

use anyhow::{anyhow, Result};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

/// Backend address used when nothing is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:30800";
/// Default request timeout applied to every backend call.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub state_dir: PathBuf,
}

impl ClientConfig {
    /// Build a config for `api_base_url`, which must be an http(s) URL with a host.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed or uses another scheme.
    pub fn new(api_base_url: &str) -> Result<Self> {
        let base = normalize_value(api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let url = Url::parse(&base)?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        }

        if url.host().is_none() {
            return Err(anyhow!("Error parsing URL: no host specified"));
        }

        Ok(Self {
            api_base_url: base.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            connect_timeout: CONNECT_TIMEOUT,
            state_dir: default_state_dir(),
        })
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, state_dir: &Path) -> Self {
        self.state_dir = state_dir.to_path_buf();
        self
    }

    /// Absolute URL for an API path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        build_url_with_base(&self.api_base_url, path)
    }
}

/// Joins a base URL and a path with exactly one slash between them.
#[must_use]
pub fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// Trims a configured value; empty means unset.
#[must_use]
pub fn normalize_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `$XDG_STATE_HOME/authkeeper`, else `$HOME/.local/state/authkeeper`, else
/// `.authkeeper` in the working directory.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    let from_env = |key: &str| env::var(key).ok().and_then(|value| normalize_value(&value));

    if let Some(state_home) = from_env("XDG_STATE_HOME") {
        return PathBuf::from(state_home).join(env!("CARGO_PKG_NAME"));
    }

    if let Some(home) = from_env("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(env!("CARGO_PKG_NAME"));
    }

    PathBuf::from(concat!(".", env!("CARGO_PKG_NAME")))
}
