pub mod context;
pub mod lockout;
pub mod session;

use crate::cli::globals::GlobalArgs;
use anyhow::Result;
use reqwest::Method;
use secrecy::SecretString;
use serde_json::Value;

pub use self::context::Context;

#[derive(Debug)]
pub enum Action {
    Login {
        username: String,
        password: Option<SecretString>,
    },
    Status,
    Renew,
    Logout,
    LogoutAll,
    Verify,
    Lockout {
        username: Option<String>,
        wait: bool,
    },
    Request {
        method: Method,
        path: String,
        body: Option<Value>,
    },
}

impl Action {
    /// Run the action against the configured identity service.
    ///
    /// # Errors
    /// Returns an error if local state cannot be opened or the operation fails.
    pub async fn execute(self, globals: &GlobalArgs) -> Result<()> {
        let context = Context::build(globals)?;

        match self {
            Self::Login { username, password } => {
                session::login(&context, &username, password).await
            }
            Self::Status => session::status(&context),
            Self::Renew => session::renew(&context).await,
            Self::Logout => session::logout(&context).await,
            Self::LogoutAll => session::logout_all(&context).await,
            Self::Verify => session::verify(&context).await,
            Self::Lockout { username, wait } => {
                lockout::show(&context, username.as_deref(), wait).await
            }
            Self::Request { method, path, body } => {
                session::request(&context, method, &path, body).await
            }
        }
    }
}
