//! Login failure classification.
//!
//! The identity service only reports why a login failed as a human-readable
//! sentence, so the reason is recovered by pattern matching. Matching is case
//! insensitive and tolerant of wording changes, but it is still tied to the
//! backend's phrasing; a structured error code should replace it as soon as
//! the service offers one.

use regex::Regex;
use std::{fmt, sync::LazyLock};

/// Lockout length assumed when a "locked" message carries no duration.
pub const DEFAULT_LOCKOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The identity does not exist; lockout rules do not apply.
    UserNotFound,
    TemporarilyLocked { remaining_seconds: u64 },
    AttemptsRemaining { count: u32 },
    GeneralError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::UserNotFound => write!(formatter, "user not found"),
            FailureKind::TemporarilyLocked { remaining_seconds } => {
                write!(formatter, "temporarily locked ({remaining_seconds}s)")
            }
            FailureKind::AttemptsRemaining { count } => {
                write!(formatter, "{count} attempt(s) remaining")
            }
            FailureKind::GeneralError => write!(formatter, "login failed"),
        }
    }
}

static LOCKED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:locked|lockout|lock-out)\b|too\s+many\s+(?:failed\s+)?(?:login\s+)?(?:attempts|tries)|temporarily\s+(?:blocked|disabled|suspended)",
    )
    .ok()
});

static NOT_FOUND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:user|account|username)\s+(?:was\s+)?(?:not\s+found|does\s+not\s+exist|doesn't\s+exist)|\bno\s+such\s+(?:user|account)|\bunknown\s+(?:user|account|username)",
    )
    .ok()
});

static ATTEMPTS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)\s+(?:more\s+)?(?:login\s+)?(?:attempts?|tries|try)\s+(?:remaining|left)|(?:remaining|left)\s+(?:login\s+)?(?:attempts?|tries)\s*[:=]?\s*(\d+)",
    )
    .ok()
});

static DURATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*([a-z]+)?").ok());

fn pattern_matches(pattern: &LazyLock<Option<Regex>>, message: &str) -> bool {
    pattern
        .as_ref()
        .is_some_and(|regex| regex.is_match(message))
}

/// Classify a login failure message.
#[must_use]
pub fn classify_failure(message: &str) -> FailureKind {
    if pattern_matches(&LOCKED, message) {
        return FailureKind::TemporarilyLocked {
            remaining_seconds: parse_duration_seconds(message).unwrap_or(DEFAULT_LOCKOUT_SECONDS),
        };
    }

    if pattern_matches(&NOT_FOUND, message) {
        return FailureKind::UserNotFound;
    }

    if let Some(count) = parse_attempts_remaining(message) {
        return FailureKind::AttemptsRemaining { count };
    }

    FailureKind::GeneralError
}

fn parse_attempts_remaining(message: &str) -> Option<u32> {
    let captures = ATTEMPTS.as_ref()?.captures(message)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .and_then(|count| count.as_str().parse().ok())
}

/// Sum every "N unit" found in `message`. A number followed by no word counts
/// as seconds; numbers followed by other words ("5 failed attempts") are ignored.
fn parse_duration_seconds(message: &str) -> Option<u64> {
    let regex = DURATION.as_ref()?;
    let mut total: Option<u64> = None;

    for captures in regex.captures_iter(message) {
        let Some(value) = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) else {
            continue;
        };

        let multiplier = match captures.get(2).map(|m| m.as_str().to_lowercase()) {
            None => 1,
            Some(unit) => match unit.as_str() {
                "s" | "sec" | "secs" | "second" | "seconds" => 1,
                "m" | "min" | "mins" | "minute" | "minutes" => 60,
                "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
                _ => continue,
            },
        };

        total = Some(total.unwrap_or(0).saturating_add(value.saturating_mul(multiplier)));
    }

    total
}
