//! Route transport error types.

use std::sync::Arc;

use serde_json::Value;
use smallworld_core::{FetchError, FieldErrors, MutationError};

use crate::fetch::url::UrlError;

/// Errors from a request against a smallworld route.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    /// Route URL could not be built.
    #[error("invalid route URL: {0}")]
    Url(#[from] UrlError),

    /// Server answered with an `{ "error": "..." }` body.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Server answered with an `{ "errors": { field: message } }` body.
    #[error("{} invalid field(s)", .errors.len())]
    Invalid { status: u16, errors: FieldErrors },

    /// Non-success response without a recognizable error body.
    #[error("HTTP error: {status}")]
    Status { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RouteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { RouteError::Timeout } else { RouteError::Network(Arc::new(err)) }
    }
}

impl RouteError {
    /// Decode a non-success response body.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let Ok(body) = serde_json::from_slice::<Value>(body) else {
            return RouteError::Status { status };
        };

        if let Some(message) = body.get("error").and_then(Value::as_str) {
            return RouteError::Server { status, message: message.to_string() };
        }

        if let Some(fields) = body.get("errors").and_then(Value::as_object) {
            let errors: FieldErrors = fields
                .iter()
                .map(|(field, message)| {
                    let message = match message {
                        Value::String(s) => s.clone(),
                        Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "),
                        other => other.to_string(),
                    };
                    (field.clone(), message)
                })
                .collect();
            if !errors.is_empty() {
                return RouteError::Invalid { status, errors };
            }
        }

        RouteError::Status { status }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RouteError::Server { status, .. } | RouteError::Invalid { status, .. } | RouteError::Status { status } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Message suitable for showing to a person.
    pub fn user_message(&self) -> String {
        match self {
            _ if self.status() == Some(503) => "server is unresponsive; retrying...".to_string(),
            RouteError::Server { message, .. } => message.clone(),
            RouteError::Status { .. } => "an unknown error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RouteError> for FetchError {
    fn from(err: RouteError) -> Self {
        match &err {
            RouteError::Server { status, .. } | RouteError::Invalid { status, .. } | RouteError::Status { status } => {
                FetchError::Status { status: *status, message: err.user_message() }
            }
            RouteError::Parse(message) => FetchError::Decode(message.clone()),
            RouteError::Url(_) | RouteError::Timeout | RouteError::Network(_) => FetchError::Transport(err.to_string()),
        }
    }
}

impl From<RouteError> for MutationError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Invalid { errors, .. } => MutationError::invalid(errors),
            RouteError::Server { .. } | RouteError::Status { .. } | RouteError::Url(_) => {
                MutationError::rejected(err.user_message())
            }
            RouteError::Timeout | RouteError::Network(_) | RouteError::Parse(_) => {
                MutationError::Transport(err.to_string())
            }
        }
    }
}
