//! # authkeeper
//!
//! Client-side session keeper for an LDAP-backed identity service.
//!
//! ## Credential lifecycle
//!
//! [`session::SessionManager`] holds a short-lived access credential and a
//! longer-lived renewal credential. It renews proactively 300 seconds before
//! the declared lifetime runs out, collapses concurrent renewals into one
//! exchange, and treats any renewal failure as the end of the session.
//! [`session::AuthenticatedClient`] signs protected requests and replays a
//! request at most once after renewing on a 401.
//!
//! ## Lockout
//!
//! [`lockout::LockoutController`] turns the backend's "temporarily locked"
//! messages into a persisted expiry instant, counts down from the wall clock
//! and refuses further logins for that identity until the lock lifts.
//!
//! Both components share a [`storage::Storage`] substrate and a
//! [`clock::Clock`]; [`login::LoginFlow`] feeds login outcomes into both.

pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod lockout;
pub mod login;
pub mod session;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
