//! Unified error types for smallworld.
//!
//! Every failure in the cache layer resolves to one of these values. Display
//! strings carry an upper-snake code prefix so log lines stay greppable.

use std::collections::BTreeMap;

use crate::config::ConfigError;

/// Field name → message, as returned by the server or produced by local validation.
pub type FieldErrors = BTreeMap<String, String>;

/// Field used for errors that are not tied to a single input.
pub const BASE_FIELD: &str = "base";

/// A read against a remote resource failed.
///
/// Cloneable because deduplicated fetches hand the same result to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Server answered with a non-success status.
    #[error("FETCH_FAILED: status {status}: {message}")]
    Status { status: u16, message: String },

    /// Network or timeout failure reported by the transport.
    #[error("FETCH_FAILED: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("DECODE_FAILED: {0}")]
    Decode(String),

    /// The task driving the fetch went away before settling.
    #[error("FETCH_ABORTED: {0}")]
    Aborted(String),
}

/// The server (or transport) rejected a state-changing action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Server refused the action, optionally with field-scoped errors.
    #[error("MUTATION_REJECTED: {message}")]
    Rejected { message: String, field_errors: FieldErrors },

    /// Network or timeout failure reported by the transport.
    #[error("MUTATION_FAILED: {0}")]
    Transport(String),

    /// Another mutation holding the same guard is still pending.
    #[error("DUPLICATE_SUBMISSION: {0}")]
    DuplicateSubmission(String),

    /// The action was dropped before it settled.
    #[error("MUTATION_ABORTED: {0}")]
    Aborted(String),
}

impl MutationError {
    /// Rejection carrying only a general message.
    pub fn rejected(message: impl Into<String>) -> Self {
        MutationError::Rejected { message: message.into(), field_errors: FieldErrors::new() }
    }

    /// Rejection carrying field-scoped errors.
    pub fn invalid(field_errors: FieldErrors) -> Self {
        let message = match field_errors.len() {
            1 => "1 field is invalid".to_string(),
            n => format!("{n} fields are invalid"),
        };
        MutationError::Rejected { message, field_errors }
    }

    /// Field errors attached to a rejection, if any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            MutationError::Rejected { field_errors, .. } if !field_errors.is_empty() => Some(field_errors),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, MutationError::DuplicateSubmission(_))
    }
}

/// Top-level error for smallworld.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty route name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FetchError::Status { status: 503, message: "server is unresponsive".to_string() };
        assert!(err.to_string().contains("FETCH_FAILED"));
        assert!(err.to_string().contains("503"));

        let err = MutationError::rejected("world is closed");
        assert_eq!(err.to_string(), "MUTATION_REJECTED: world is closed");
    }

    #[test]
    fn test_invalid_collects_field_errors() {
        let mut errors = FieldErrors::new();
        errors.insert("body".into(), "can't be blank".into());
        let err = MutationError::invalid(errors);
        assert_eq!(err.field_errors().map(|e| e.len()), Some(1));
        assert!(err.to_string().contains("1 field is invalid"));
    }

    #[test]
    fn test_field_errors_absent_for_plain_rejection() {
        assert!(MutationError::rejected("nope").field_errors().is_none());
        assert!(MutationError::Transport("reset".into()).field_errors().is_none());
    }

    #[test]
    fn test_wrapped_errors_are_transparent() {
        let err: Error = FetchError::Transport("timed out".into()).into();
        assert_eq!(err.to_string(), "FETCH_FAILED: timed out");
        assert!(MutationError::DuplicateSubmission("post".into()).is_duplicate());
    }
}
