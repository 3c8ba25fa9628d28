use super::Context;
use crate::lockout::LockoutStatus;
use anyhow::Result;
use tracing::warn;

fn describe(status: &LockoutStatus) -> String {
    match (&status.username, status.locked) {
        (Some(username), true) => format!(
            "{username} is locked, {}s remaining",
            status.remaining_seconds
        ),
        _ => "Unlocked".to_string(),
    }
}

/// Print the lockout state, optionally following the countdown to zero.
///
/// # Errors
/// Never fails; a backend lookup failure only logs a warning.
pub async fn show(context: &Context, username: Option<&str>, wait: bool) -> Result<()> {
    let mut status = context.lockout.status();

    if let (false, Some(username)) = (status.locked, username) {
        match context
            .lockout
            .resume_from_backend(context.backend.as_ref(), username)
            .await
        {
            Ok(resumed) => status = resumed,
            Err(err) => warn!("lockout lookup failed: {}", err),
        }
    }

    println!("{}", describe(&status));

    if !wait {
        return Ok(());
    }

    let mut updates = context.lockout.subscribe();
    while status.locked {
        if updates.changed().await.is_err() {
            break;
        }
        status = updates.borrow_and_update().clone();
        println!("{}", describe(&status));
    }

    Ok(())
}
