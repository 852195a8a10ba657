//! Completion Relay Error Types
//!
//! Construction-time errors for the client and the outcome taxonomy reported
//! to callers when a logical completion call fails.

use std::fmt;
use std::sync::Arc;

/// Main error type for setting up clients and loading configuration
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration errors (invalid JSON, missing fields, bad header values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}

/// Result type alias for Completion Relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Why a logical completion call ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionErrorKind {
    /// Catch-all; may carry the failure that caused it
    Unknown,

    /// The transport returned nothing usable
    NoResponse,

    /// The account ran out of quota. Never retried.
    OutOfTokens,

    /// The caller cancelled the call. Never retried.
    Aborted,
}

impl fmt::Display for CompletionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionErrorKind::Unknown => "unknown",
            CompletionErrorKind::NoResponse => "no response",
            CompletionErrorKind::OutOfTokens => "out of tokens",
            CompletionErrorKind::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

pub(crate) const NO_RESPONSE_MESSAGE: &str =
    "Could not get a response from the completion API. Perhaps the servers are down?";
pub(crate) const OUT_OF_TOKENS_MESSAGE: &str =
    "Ran out of tokens. Contact your API account holder please.";
pub(crate) const CANNOT_PARSE_MESSAGE: &str = "Cannot parse response.";
pub(crate) const STREAM_ERROR_MESSAGE: &str = "Stream just had an error.";

/// Terminal error delivered once per logical completion call
#[derive(Clone)]
pub struct CompletionError {
    kind: CompletionErrorKind,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl CompletionError {
    /// Create an error of the given kind
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Unknown, message)
    }

    /// An `Unknown` error that keeps the failure which caused it
    pub fn unknown_with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind: CompletionErrorKind::Unknown,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn no_response(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::NoResponse, message)
    }

    pub fn out_of_tokens() -> Self {
        Self::new(CompletionErrorKind::OutOfTokens, OUT_OF_TOKENS_MESSAGE)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Aborted, message)
    }

    /// Outcome kind
    pub fn kind(&self) -> CompletionErrorKind {
        self.kind
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The failure behind an `Unknown` outcome, if one was captured
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == CompletionErrorKind::Aborted
    }
}

impl fmt::Debug for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Completion failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for CompletionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Equality ignores the cause; two errors match when kind and message match.
impl PartialEq for CompletionError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl Eq for CompletionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = CompletionError::aborted("Aborted");
        assert_eq!(err.to_string(), "Completion failed (aborted): Aborted");
        assert!(err.is_aborted());
    }

    #[test]
    fn test_unknown_keeps_cause_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "dns lookup failed");
        let err = CompletionError::unknown_with_cause("dns lookup failed", io);

        assert_eq!(err.kind(), CompletionErrorKind::Unknown);
        assert_eq!(err.cause().unwrap().to_string(), "dns lookup failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_equality_ignores_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(
            CompletionError::unknown_with_cause("boom", io),
            CompletionError::unknown("boom")
        );
        assert_ne!(
            CompletionError::unknown("boom"),
            CompletionError::no_response("boom")
        );
    }

    #[test]
    fn test_relay_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: RelayError = json_err.into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
