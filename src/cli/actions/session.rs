use super::Context;
use crate::{
    backend::{ApiRequest, HttpTransport},
    error::SessionError,
    session::AuthenticatedClient,
};
use anyhow::{anyhow, Context as _, Result};
use chrono::SecondsFormat;
use inquire::{Password, PasswordDisplayMode};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::io::{self, BufRead, IsTerminal};

/// Masked prompt on a terminal, one line from stdin otherwise.
fn read_password() -> Result<SecretString> {
    let password = if io::stdin().is_terminal() {
        Password::new("Password:")
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Hidden)
            .prompt()
            .context("Failed to read password")?
    } else {
        return password_line(io::stdin().lock());
    };

    if password.is_empty() {
        return Err(anyhow!("empty password"));
    }

    Ok(SecretString::from(password))
}

fn password_line(mut input: impl BufRead) -> Result<SecretString> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(anyhow!("empty password"));
    }

    Ok(SecretString::from(password.to_string()))
}

/// # Errors
/// Returns an error if the login is refused, locked out or the backend is
/// unreachable.
pub async fn login(
    context: &Context,
    username: &str,
    password: Option<SecretString>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };

    match context.login_flow().login(username, &password).await {
        Ok(user) => {
            let display = user.name.as_deref().unwrap_or(&user.username);
            println!("Logged in as {display}");
            if let Some(role) = user.role {
                println!("Role: {role}");
            }
            Ok(())
        }
        Err(SessionError::LockoutActive {
            username,
            remaining_seconds,
        }) => Err(anyhow!(
            "{username} is locked, try again in {remaining_seconds} seconds"
        )),
        Err(err) => Err(err.into()),
    }
}

/// # Errors
/// Never fails today; kept fallible like the other actions.
pub fn status(context: &Context) -> Result<()> {
    let tokens = context.session.status();
    let lockout = context.lockout.status();

    let report = json!({
        "has_tokens": tokens.has_tokens,
        "is_expired": tokens.is_expired,
        "expires_at": tokens
            .expires_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        "time_until_expiry": tokens.time_until_expiry.as_secs(),
        "renewable": context.session.has_renewal_credential(),
        "lockout": {
            "locked": lockout.locked,
            "username": lockout.username,
            "remaining_seconds": lockout.remaining_seconds,
        },
    });

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// # Errors
/// Returns the renewal failure; the stored session is gone afterwards.
pub async fn renew(context: &Context) -> Result<()> {
    let access = context.session.renew().await?;

    match access.expires_at {
        Some(at) => println!(
            "Renewed, next renewal at {}",
            at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => println!("Renewed"),
    }

    Ok(())
}

/// # Errors
/// Never fails: local state is always cleared.
pub async fn logout(context: &Context) -> Result<()> {
    context.session.logout().await;
    println!("Logged out");
    Ok(())
}

/// # Errors
/// Never fails: local state is always cleared.
pub async fn logout_all(context: &Context) -> Result<()> {
    context.session.logout_all().await;
    println!("Logged out of all sessions");
    Ok(())
}

/// # Errors
/// Returns an error without credentials or when the backend cannot answer.
pub async fn verify(context: &Context) -> Result<()> {
    let verification = context.session.verify_token().await?;

    let report = json!({
        "valid": verification.valid,
        "expired": verification.expired,
        "data": verification.data,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);

    if verification.valid {
        Ok(())
    } else {
        Err(anyhow!("credential is not valid"))
    }
}

/// # Errors
/// Returns an error for network failures, failed renewals, and non-success
/// statuses.
pub async fn request(
    context: &Context,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> Result<()> {
    let transport = HttpTransport::new(context.config.clone())?;
    let client = AuthenticatedClient::new(context.session.clone(), transport);

    let mut request = ApiRequest::new(method, path);
    if let Some(body) = body {
        request = request.with_body(body);
    }

    let response = client.send(request).await?;

    match serde_json::from_str::<Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }

    if response.is_success() {
        Ok(())
    } else {
        Err(anyhow!("request failed with status {}", response.status))
    }
}
