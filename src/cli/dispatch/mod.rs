//! Maps validated CLI matches to an action plus the options shared by all of
//! them.

use crate::cli::{
    actions::Action,
    commands::{self, session},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::Value;

/// # Errors
/// Returns an error if a subcommand is missing or an argument is malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<(Action, GlobalArgs)> {
    let api_url = matches
        .get_one::<String>(commands::ARG_API_URL)
        .context("missing required argument: --api-url")?;

    let globals = GlobalArgs::new(api_url)
        .with_state_dir(
            matches
                .get_one::<String>(commands::ARG_STATE_DIR)
                .map(String::as_str),
        )
        .with_timeout(matches.get_one::<u64>(commands::ARG_TIMEOUT).copied());

    let action = match matches.subcommand() {
        Some((session::CMD_LOGIN, sub_m)) => Action::Login {
            username: sub_m
                .get_one::<String>(session::ARG_USERNAME)
                .cloned()
                .context("missing required argument: --username")?,
            password: sub_m
                .get_one::<String>(session::ARG_PASSWORD)
                .map(|password| SecretString::from(password.clone())),
        },
        Some((session::CMD_STATUS, _)) => Action::Status,
        Some((session::CMD_RENEW, _)) => Action::Renew,
        Some((session::CMD_LOGOUT, _)) => Action::Logout,
        Some((session::CMD_LOGOUT_ALL, _)) => Action::LogoutAll,
        Some((session::CMD_VERIFY, _)) => Action::Verify,
        Some((session::CMD_LOCKOUT, sub_m)) => Action::Lockout {
            username: sub_m.get_one::<String>(session::ARG_USERNAME).cloned(),
            wait: sub_m.get_flag(session::ARG_WAIT),
        },
        Some((session::CMD_REQUEST, sub_m)) => {
            let method = sub_m
                .get_one::<String>(session::ARG_METHOD)
                .map_or("GET", String::as_str);

            let body = sub_m
                .get_one::<String>(session::ARG_DATA)
                .map(|data| serde_json::from_str::<Value>(data))
                .transpose()
                .context("--data must be valid JSON")?;

            Action::Request {
                method: Method::from_bytes(method.to_uppercase().as_bytes())
                    .map_err(|_| anyhow!("invalid HTTP method: {method}"))?,
                path: sub_m
                    .get_one::<String>(session::ARG_PATH)
                    .cloned()
                    .context("missing required argument: <path>")?,
                body,
            }
        }
        _ => return Err(anyhow!("unknown subcommand")),
    };

    Ok((action, globals))
}
