//! Completion Engine
//!
//! Drives logical completion calls over a [`Transport`]: one call may span
//! several attempts, reports progress as it goes and ends with at most one
//! terminal error.

pub mod cancel;
pub mod chat;
pub mod simple;
pub mod state;
pub mod text;

pub use cancel::Cancellation;
pub use chat::{ChatCompletionDriver, ChatCompletionParams, ChatProgress};
pub use simple::{complete_chat_simple, complete_text_simple};
pub use state::{RequestAttemptState, RetryPolicy};
pub use text::{TextCompletionDriver, TextCompletionParams};

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::completion::ErrorEnvelope;
use crate::client::transport::{ResponseBody, Transport, TransportRequest, TransportResponse};
use crate::error::CompletionError;
use cancel::ABORTED_MESSAGE;

/// Keys removed from error payloads before they are logged
const SENSITIVE_KEYS: [&str; 5] = ["client", "req", "socket", "request", "response"];

const PREVIEW_CHARS: usize = 200;

/// How one attempt ended
pub(crate) enum Step {
    Done,
    Fail(CompletionError),
    Retry(RetryRequest),
}

/// A retryable failure and the error to report if the budget is spent
pub(crate) struct RetryRequest {
    pub reason: String,
    pub exhausted: CompletionError,
    pub payload: Option<Value>,
}

impl RetryRequest {
    pub fn new(reason: impl Into<String>, exhausted: CompletionError) -> Self {
        Self {
            reason: reason.into(),
            exhausted,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Send one request, honoring the pre-flight and post-response checkpoints.
pub(crate) async fn dispatch<T: Transport + ?Sized>(
    transport: &T,
    request: TransportRequest,
    cancel: &Cancellation,
) -> Result<TransportResponse, CompletionError> {
    if cancel.is_cancelled() {
        return Err(CompletionError::aborted(ABORTED_MESSAGE));
    }

    let response = match cancel.guard(transport.send(request, cancel.token())).await {
        None => return Err(CompletionError::aborted(ABORTED_MESSAGE)),
        Some(result) => result?,
    };

    if cancel.is_cancelled() {
        return Err(CompletionError::aborted(ABORTED_MESSAGE));
    }

    Ok(response)
}

/// Outcome of a response whose status is not 200
pub(crate) fn classify_http_error(response: TransportResponse) -> Step {
    let status = response.status;
    let payload = match response.body {
        ResponseBody::Json(value) => value,
        ResponseBody::Stream(_) => Value::Null,
    };

    if let Some(envelope) = ErrorEnvelope::from_value(&payload) {
        if envelope.error.is_insufficient_quota() {
            return Step::Fail(CompletionError::out_of_tokens());
        }
    }

    Step::Retry(
        RetryRequest::new(
            format!("HTTP status {status}"),
            CompletionError::unknown(format!("Bad response {status}!")),
        )
        .with_payload(payload),
    )
}

/// Consume a retry, waiting out any backoff, or report the exhausted error.
pub(crate) async fn retry_or_report<E>(
    state: &mut RequestAttemptState<E>,
    cancel: &Cancellation,
    retry: RetryRequest,
    call: &'static str,
) -> Flow
where
    E: FnOnce(CompletionError),
{
    if state.try_retry() {
        warn!(
            call,
            attempt = state.attempt(),
            retries = state.retries(),
            max_retries = state.max_retries(),
            reason = %retry.reason,
            "retrying completion"
        );

        if let Some(delay) = state.next_delay() {
            debug!(call, delay_ms = delay.as_millis() as u64, "waiting before retry");
            if !cancel.sleep(delay).await {
                state.report(CompletionError::aborted(ABORTED_MESSAGE));
                return Flow::Stop;
            }
        }
        return Flow::Continue;
    }

    match retry.payload {
        Some(payload) => error!(
            call,
            retries = state.retries(),
            payload = %redact_payload(payload),
            "{}",
            retry.exhausted.message()
        ),
        None => error!(
            call,
            retries = state.retries(),
            reason = %retry.reason,
            "{}",
            retry.exhausted.message()
        ),
    }
    state.report(retry.exhausted);
    Flow::Stop
}

/// Drop transport internals from an error payload before logging it
pub(crate) fn redact_payload(mut payload: Value) -> Value {
    if let Some(object) = payload.as_object_mut() {
        for key in SENSITIVE_KEYS {
            object.remove(key);
        }
    }
    payload
}

/// Leading part of a payload, for log lines
pub(crate) fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &payload[..end],
        None => payload,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_payload_strips_transport_internals() {
        let payload = json!({
            "error": {"message": "boom"},
            "request": {"headers": {"authorization": "Bearer sk-live"}},
            "socket": "fd 12",
            "client": {},
            "req": {},
            "response": {}
        });

        assert_eq!(redact_payload(payload), json!({"error": {"message": "boom"}}));
        assert_eq!(redact_payload(json!("plain text")), json!("plain text"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_quota_error_is_terminal() {
        let response = TransportResponse::json(
            429,
            testing::error_body("You exceeded your current quota", "insufficient_quota"),
        );
        match classify_http_error(response) {
            Step::Fail(err) => assert_eq!(err, CompletionError::out_of_tokens()),
            _ => panic!("quota errors must not be retried"),
        }
    }

    #[test]
    fn test_other_statuses_are_retryable() {
        let response = TransportResponse::json(500, json!("upstream timeout"));
        match classify_http_error(response) {
            Step::Retry(retry) => {
                assert_eq!(retry.exhausted, CompletionError::unknown("Bad response 500!"));
                assert_eq!(retry.payload, Some(json!("upstream timeout")));
            }
            _ => panic!("expected a retry"),
        }
    }
}
