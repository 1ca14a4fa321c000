//! Error types for the chat engine.

use thiserror::Error;

/// Fixed answer shown in place of a reply when a stream or token request fails.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I am unable to answer that right now. Please try again later.";

/// Default action error when the backend gives no usable message.
pub const DEFAULT_ACTION_ERROR: &str = "Unable to execute action.";

/// Chat engine errors
#[derive(Error, Debug)]
pub enum ChatError {
    /// Caller input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// A discrete backend call failed
    #[error("Request failed: {message}")]
    Request {
        message: String,
        status: Option<u16>,
    },

    /// Stream-level failure (error frame or broken connection)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state
    #[error("Invalid state for {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Build a request error from a backend error body.
    ///
    /// The Pi API reports failures under `error`, `detail` or `message`
    /// depending on the endpoint; the first one present wins.
    pub fn from_body(status: Option<u16>, body: &serde_json::Value) -> Self {
        let message = ["error", "detail", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_ACTION_ERROR.to_string());
        Self::Request { message, status }
    }

    /// Shorthand for a request error with no HTTP status.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            status: None,
        }
    }

    /// The message to surface as a dialogue `action_error`.
    pub fn action_message(&self) -> String {
        match self {
            Self::Request { message, .. } if !message.is_empty() => message.clone(),
            Self::Request { .. } => DEFAULT_ACTION_ERROR.to_string(),
            other => other.to_string(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
