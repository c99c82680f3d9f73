//! Error taxonomy for BBTag execution.
//!
//! Three layers, matching who gets to see what:
//!
//! - [`ParseError`] — malformed source; fatal before execution starts.
//! - [`RuntimeError`] — a subtag's preconditions failed.  Rendered inline
//!   as `` `Message` `` replacement text, recorded in the execution's
//!   error list, and evaluation of the remaining siblings continues.
//!   Limit violations, timeouts, and platform rejections are all
//!   variants of this layer; only the Aborted state latch stops a run.
//! - [`PlatformError`] — the host platform rejected an action.  Mapped
//!   into a [`RuntimeError`] with the internal diagnostic noise stripped
//!   before the user sees it.

use thiserror::Error;

use crate::parser::{SourceLocation, SourceSpan};

// ── Parse errors ──────────────────────────────────────────────────────────────

/// Malformed BBTag source (unbalanced braces).  Execution never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {location}")]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        ParseError { message: message.into(), location }
    }
}

// ── Platform errors ───────────────────────────────────────────────────────────

/// Failure reported by the host platform client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("rate limited")]
    RateLimited,
}

// ── Runtime errors ────────────────────────────────────────────────────────────

/// A recoverable failure raised while executing a subtag.
///
/// The `Display` text is exactly what ends up between backticks in the
/// rendered output, so messages here are user-facing and deliberately
/// terse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Message(String),

    /// Carries the offending value for telemetry; the user just sees
    /// `Not a number`.
    #[error("Not a number")]
    NotANumber(String),

    #[error("Not a boolean")]
    NotABoolean(String),

    #[error("Invalid operator")]
    InvalidOperator(String),

    #[error("Unknown subtag {0}")]
    UnknownSubtag(String),

    #[error("Not enough arguments")]
    NotEnoughArguments,

    #[error("Too many arguments")]
    TooManyArguments,

    #[error("No user found")]
    UserNotFound,

    #[error("No role found")]
    RoleNotFound,

    #[error("No message found")]
    MessageNotFound,

    #[error("Index out of range")]
    IndexOutOfRange,

    /// A limit rule rejected the call; `text` already names the rule and
    /// subtag ("Usage limit reached for reactremove").
    #[error("{text}")]
    Limit { text: String },

    #[error("Too many loops")]
    TooManyLoops(u64),

    /// Several validation failures reported together (e.g. `for`'s four
    /// argument checks).
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<RuntimeError>),

    /// The wait's deadline in milliseconds, echoed in the message.
    #[error("Wait timed out after {0}")]
    Timeout(u64),

    #[error("{0}")]
    Platform(String),
}

impl RuntimeError {
    /// Build the inline replacement token shown to the end user.
    pub fn inline_text(&self) -> String {
        format!("`{self}`")
    }
}

impl From<PlatformError> for RuntimeError {
    /// User-facing mapping; internal diagnostics are dropped here.
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound(what) => RuntimeError::Platform(format!("{what} not found")),
            PlatformError::PermissionDenied(_) => {
                RuntimeError::Platform("Missing permissions".to_owned())
            }
            PlatformError::RateLimited => RuntimeError::Platform("Rate limited".to_owned()),
        }
    }
}

fn join_messages(errors: &[RuntimeError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

// ── Located errors ────────────────────────────────────────────────────────────

/// A runtime error annotated with the source span of the subtag call that
/// raised it.  The full list is returned to the caller for telemetry; the
/// end user only sees the inline substitutions.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedError {
    pub span: SourceSpan,
    pub error: RuntimeError,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_number_display_hides_value() {
        let err = RuntimeError::NotANumber("abc".into());
        assert_eq!(err.to_string(), "Not a number");
        assert_eq!(err.inline_text(), "`Not a number`");
    }

    #[test]
    fn aggregate_joins_messages() {
        let err = RuntimeError::Aggregate(vec![
            RuntimeError::Message("Initial must be a number".into()),
            RuntimeError::InvalidOperator("nope".into()),
        ]);
        assert_eq!(err.to_string(), "Initial must be a number, Invalid operator");
    }

    #[test]
    fn platform_errors_are_cleaned_up() {
        let err: RuntimeError =
            PlatformError::PermissionDenied("bot lacks BAN_MEMBERS in guild 123".into()).into();
        assert_eq!(err.to_string(), "Missing permissions");
    }

    #[test]
    fn timeout_display_carries_the_deadline() {
        assert_eq!(RuntimeError::Timeout(60000).to_string(), "Wait timed out after 60000");
    }
}
