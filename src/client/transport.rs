//! Transport Boundary
//!
//! The seam between the completion engine and whatever performs HTTP. A
//! transport either yields a response (any status) or a [`TransportError`]
//! saying the exchange never produced one.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::CompletionError;

/// Which completion endpoint to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
}

impl Endpoint {
    /// Path relative to the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "chat/completions",
            Endpoint::Completions => "completions",
        }
    }
}

/// How the response body should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Buffer and parse as JSON
    Json,

    /// Hand over the raw byte stream
    Stream,
}

/// Transport-specific pass-through options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Extra headers for this call only
    pub headers: HashMap<String, String>,

    /// Per-call timeout overriding the client default
    pub timeout: Option<Duration>,
}

/// One HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub endpoint: Endpoint,
    pub body: Value,
    pub mode: ResponseMode,
    pub options: RequestOptions,
}

/// Raw response bytes, ending when the server closes the stream
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Response payload
pub enum ResponseBody {
    /// Buffered JSON. Non-JSON error bodies arrive as a JSON string.
    Json(Value),

    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An HTTP response with any status
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Json(value),
        }
    }

    pub fn stream(status: u16, stream: ByteStream) -> Self {
        Self {
            status,
            body: ResponseBody::Stream(stream),
        }
    }

    /// Only 200 carries a usable completion body
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// The exchange failed without a usable HTTP response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// DNS, connect or TLS failure
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The server answered with nothing usable
    #[error("No response: {0}")]
    NoResponse(String),

    /// The body stream broke after the response started
    #[error("Streaming error: {0}")]
    Stream(String),

    /// The request could not be built (bad header, bad URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The cancellation token fired
    #[error("Request cancelled")]
    Cancelled,
}

impl From<TransportError> for CompletionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => CompletionError::aborted("Aborted"),
            TransportError::NoResponse(_) => {
                CompletionError::no_response(crate::error::NO_RESPONSE_MESSAGE)
            }
            other => CompletionError::unknown_with_cause(other.to_string(), other),
        }
    }
}

/// Performs one HTTP exchange per call.
///
/// Implementations must stop work promptly once `cancel` fires, returning
/// [`TransportError::Cancelled`] or ending the byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        (**self).send(request, cancel).await
    }
}
