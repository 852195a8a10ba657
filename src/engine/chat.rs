//! Chat Completion Driver
//!
//! Runs one logical chat completion: builds the request, dispatches it,
//! consumes a buffered or streamed response and retries retryable failures.
//!
//! Progress arrives as [`ChatProgress`] events tagged with the attempt that
//! produced them. Callers that merge deltas must start over when the attempt
//! number changes; [`DeltaAccumulator`](crate::api::DeltaAccumulator) does so.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::completion::{
    ChatCompletionOptions, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};
use crate::api::sse::{parse_payload, SseLines, SsePayload};
use crate::api::streaming::StreamDelta;
use crate::client::transport::{
    ByteStream, Endpoint, RequestOptions, ResponseBody, ResponseMode, Transport, TransportRequest,
};
use crate::engine::cancel::{Cancellation, STREAM_ABORTED_MESSAGE};
use crate::engine::state::{RequestAttemptState, RetryPolicy};
use crate::engine::{
    classify_http_error, dispatch, preview, retry_or_report, Flow, RetryRequest, Step,
};
use crate::error::{CompletionError, CANNOT_PARSE_MESSAGE, STREAM_ERROR_MESSAGE};

const CALL: &str = "chat";

/// One progress event: a delta and the attempt it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ChatProgress {
    /// 1-based attempt number
    pub attempt: u32,
    pub delta: StreamDelta,
}

/// Inputs of one logical chat completion
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionParams {
    pub messages: Vec<ChatMessage>,

    /// Overrides merged over the driver defaults
    pub options: ChatCompletionOptions,

    pub cancel: Option<CancellationToken>,

    pub request_options: RequestOptions,
}

impl ChatCompletionParams {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: ChatCompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_request_options(mut self, request_options: RequestOptions) -> Self {
        self.request_options = request_options;
        self
    }
}

/// Chat completion driver
pub struct ChatCompletionDriver<T> {
    transport: T,
    defaults: ChatCompletionOptions,
    retry: RetryPolicy,
}

impl<T: Transport> ChatCompletionDriver<T> {
    /// Driver with the stock defaults and three retries
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            defaults: ChatCompletionOptions::defaults(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ChatCompletionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn defaults(&self) -> &ChatCompletionOptions {
        &self.defaults
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one logical chat completion.
    ///
    /// `on_progress` receives every delta in arrival order. `on_error` is
    /// called at most once, and nothing is delivered after it. Returning
    /// without calling `on_error` means the call completed.
    pub async fn run<P, E>(&self, params: ChatCompletionParams, mut on_progress: P, on_error: E)
    where
        P: FnMut(ChatProgress),
        E: FnOnce(CompletionError),
    {
        let ChatCompletionParams {
            messages,
            options,
            cancel,
            request_options,
        } = params;
        let cancel = Cancellation::new(cancel);
        let mut state = RequestAttemptState::new(&self.retry, on_error);

        loop {
            let step = self
                .attempt(
                    &messages,
                    &options,
                    &request_options,
                    &cancel,
                    state.attempt(),
                    &mut on_progress,
                )
                .await;

            match step {
                Step::Done => return,
                Step::Fail(err) => {
                    debug!(attempt = state.attempt(), error = %err, "chat completion failed");
                    state.report(err);
                    return;
                }
                Step::Retry(retry) => match retry_or_report(&mut state, &cancel, retry, CALL).await {
                    Flow::Continue => continue,
                    Flow::Stop => return,
                },
            }
        }
    }

    async fn attempt<P>(
        &self,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
        request_options: &RequestOptions,
        cancel: &Cancellation,
        attempt: u32,
        on_progress: &mut P,
    ) -> Step
    where
        P: FnMut(ChatProgress),
    {
        let request = ChatCompletionRequest::build(&self.defaults, options.clone(), messages.to_vec());
        let stream = request.stream;
        debug!(attempt, model = %request.model, stream, "dispatching chat completion");

        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(err) => {
                return Step::Fail(CompletionError::unknown_with_cause(err.to_string(), err))
            }
        };

        let request = TransportRequest {
            endpoint: Endpoint::ChatCompletions,
            body,
            mode: if stream {
                ResponseMode::Stream
            } else {
                ResponseMode::Json
            },
            options: request_options.clone(),
        };

        let response = match dispatch(&self.transport, request, cancel).await {
            Ok(response) => response,
            Err(err) => return Step::Fail(err),
        };

        if !response.is_ok() {
            return classify_http_error(response);
        }

        match response.body {
            ResponseBody::Json(value) => deliver_response(value, attempt, on_progress),
            ResponseBody::Stream(body) => consume_stream(body, cancel, attempt, on_progress).await,
        }
    }
}

/// A buffered response becomes exactly one progress event.
fn deliver_response<P>(value: serde_json::Value, attempt: u32, on_progress: &mut P) -> Step
where
    P: FnMut(ChatProgress),
{
    match serde_json::from_value::<ChatCompletionResponse>(value) {
        Ok(response) => {
            on_progress(ChatProgress {
                attempt,
                delta: StreamDelta::from(response),
            });
            Step::Done
        }
        Err(err) => {
            warn!(attempt, error = %err, "could not parse chat completion response");
            Step::Retry(RetryRequest::new(
                format!("unparseable response: {err}"),
                CompletionError::unknown(CANNOT_PARSE_MESSAGE),
            ))
        }
    }
}

async fn consume_stream<P>(
    body: ByteStream,
    cancel: &Cancellation,
    attempt: u32,
    on_progress: &mut P,
) -> Step
where
    P: FnMut(ChatProgress),
{
    let mut lines = SseLines::new(body);

    loop {
        let next = match cancel.guard(lines.next()).await {
            Some(next) => next,
            None => return Step::Fail(CompletionError::aborted(STREAM_ABORTED_MESSAGE)),
        };

        let payload = match next {
            None => {
                debug!(attempt, "chat stream finished");
                return Step::Done;
            }
            Some(Err(err)) => {
                if cancel.is_cancelled() {
                    return Step::Fail(CompletionError::aborted(STREAM_ABORTED_MESSAGE));
                }
                return Step::Retry(RetryRequest::new(
                    err.to_string(),
                    CompletionError::unknown_with_cause(STREAM_ERROR_MESSAGE, err),
                ));
            }
            Some(Ok(payload)) => payload,
        };

        match parse_payload::<StreamDelta>(&payload) {
            Ok(SsePayload::Data(delta)) => on_progress(ChatProgress { attempt, delta }),
            Ok(SsePayload::Error(body)) => {
                let json = serde_json::to_string(&body).unwrap_or_else(|_| body.message.clone());
                return Step::Retry(RetryRequest::new(
                    format!("error event: {}", body.message),
                    CompletionError::unknown(format!("Error: {json}")),
                ));
            }
            Err(err) => {
                warn!(attempt, error = %err, payload = preview(&payload), "could not parse stream message");
                return Step::Retry(RetryRequest::new(
                    format!("unparseable stream message: {err}"),
                    CompletionError::unknown(CANNOT_PARSE_MESSAGE),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::merge::DeltaAccumulator;
    use crate::api::streaming::FinishReason;
    use crate::client::transport::TransportError;
    use crate::engine::testing::{
        chat_chunk, chat_response, error_body, sse, sse_frame, Scripted, ScriptedTransport,
    };
    use crate::error::CompletionErrorKind;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::Arc;

    /// Collected callbacks of one run
    #[derive(Default)]
    struct Outcome {
        progress: Vec<ChatProgress>,
        errors: Vec<CompletionError>,
    }

    async fn run_chat(
        driver: &ChatCompletionDriver<Arc<ScriptedTransport>>,
        params: ChatCompletionParams,
    ) -> Outcome {
        let mut progress = Vec::new();
        let mut errors = Vec::new();
        driver
            .run(params, |event| progress.push(event), |err| errors.push(err))
            .await;
        Outcome { progress, errors }
    }

    fn hello() -> ChatCompletionParams {
        ChatCompletionParams::new(vec![ChatMessage::user("hello")])
    }

    fn streaming() -> ChatCompletionOptions {
        ChatCompletionOptions::default().with_stream(true)
    }

    #[tokio::test]
    async fn test_buffered_response_is_one_progress_event() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Json(
            200,
            chat_response("Hi there"),
        )]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello()).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.progress.len(), 1);
        assert_eq!(outcome.progress[0].attempt, 1);
        assert_eq!(outcome.progress[0].delta.first_content(), Some("Hi there"));

        let requests = transport.requests();
        assert_eq!(requests[0].endpoint, Endpoint::ChatCompletions);
        assert_eq!(requests[0].mode, ResponseMode::Json);
        assert_eq!(requests[0].body["model"], "gpt-3.5-turbo");
        assert_eq!(requests[0].body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn test_stream_and_buffered_merge_to_same_content() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Stream(
                200,
                sse(&[
                    json!({
                        "id": "chatcmpl-2",
                        "object": "chat.completion.chunk",
                        "created": 1_700_000_001u64,
                        "model": "gpt-3.5-turbo",
                        "choices": [{
                            "index": 0,
                            "delta": {"role": "assistant", "content": "Hi"},
                            "finish_reason": null
                        }]
                    }),
                    chat_chunk(" there", None),
                    chat_chunk("", Some("stop")),
                ]),
            ),
            Scripted::Json(200, chat_response("Hi there")),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let streamed = run_chat(&driver, hello().with_options(streaming())).await;
        let buffered = run_chat(&driver, hello()).await;

        let mut stream_acc = DeltaAccumulator::new();
        for event in &streamed.progress {
            stream_acc.push(event);
        }
        let mut buffer_acc = DeltaAccumulator::new();
        for event in &buffered.progress {
            buffer_acc.push(event);
        }

        assert_eq!(streamed.progress.len(), 3);
        let streamed = stream_acc.into_result().unwrap();
        let buffered = buffer_acc.into_result().unwrap();
        assert_eq!(streamed.first_content(), Some("Hi there"));
        assert_eq!(streamed.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(streamed.choices, buffered.choices);

        assert_eq!(transport.requests()[0].mode, ResponseMode::Stream);
        assert_eq!(transport.requests()[0].body["stream"], true);
    }

    #[tokio::test]
    async fn test_bad_status_retries_then_fails() {
        let transport = Arc::new(ScriptedTransport::repeating(500, json!("Internal error")));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello()).await;

        assert_eq!(transport.request_count(), 4);
        assert!(outcome.progress.is_empty());
        assert_eq!(outcome.errors, vec![CompletionError::unknown("Bad response 500!")]);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_later_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Json(502, json!("Bad gateway")),
            Scripted::Json(200, chat_response("recovered")),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello()).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.progress.len(), 1);
        assert_eq!(outcome.progress[0].attempt, 2);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_between_retries_reports_aborted() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Json(500, json!("Internal error")),
            Scripted::CancelAndJson(500, json!("Internal error")),
            Scripted::Json(200, chat_response("too late")),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());
        let token = CancellationToken::new();

        let outcome = run_chat(&driver, hello().with_cancellation(token.clone())).await;

        assert!(token.is_cancelled());
        assert_eq!(transport.request_count(), 2);
        assert!(outcome.progress.is_empty());
        assert_eq!(outcome.errors, vec![CompletionError::aborted("Aborted")]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_reports_aborted() {
        let transport = Arc::new(ScriptedTransport::repeating(500, json!("Internal error")));
        let policy = RetryPolicy::new(3).with_backoff(backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_secs(30),
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        });
        let driver = ChatCompletionDriver::new(transport.clone()).with_retry_policy(policy);
        let token = CancellationToken::new();

        let trigger = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                token.cancel();
            })
        };
        let outcome = run_chat(&driver, hello().with_cancellation(token)).await;
        trigger.await.unwrap();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(outcome.errors, vec![CompletionError::aborted("Aborted")]);
    }

    #[tokio::test]
    async fn test_quota_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::repeating(
            429,
            error_body("You exceeded your current quota", "insufficient_quota"),
        ));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello()).await;

        assert_eq!(transport.request_count(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind(), CompletionErrorKind::OutOfTokens);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let transport = Arc::new(ScriptedTransport::repeating(200, chat_response("unused")));
        let driver = ChatCompletionDriver::new(transport.clone());
        let token = CancellationToken::new();
        token.cancel();

        let outcome = run_chat(&driver, hello().with_cancellation(token)).await;

        assert_eq!(transport.request_count(), 0);
        assert!(outcome.progress.is_empty());
        assert_eq!(outcome.errors, vec![CompletionError::aborted("Aborted")]);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_delivery() {
        let (sender, receiver) = futures::channel::mpsc::unbounded();
        sender
            .unbounded_send(sse_frame(&chat_chunk("first", None)))
            .unwrap();
        sender
            .unbounded_send(sse_frame(&chat_chunk("second", None)))
            .unwrap();

        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Channel(200, receiver)]));
        let driver = ChatCompletionDriver::new(transport.clone());
        let token = CancellationToken::new();
        let params = hello()
            .with_options(streaming())
            .with_cancellation(token.clone());

        let mut progress = Vec::new();
        let mut errors = Vec::new();
        driver
            .run(
                params,
                |event| {
                    progress.push(event);
                    token.cancel();
                },
                |err| errors.push(err),
            )
            .await;

        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].delta.first_content(), Some("first"));
        assert_eq!(errors, vec![CompletionError::aborted("Stream aborted")]);
        assert_eq!(transport.request_count(), 1);
        drop(sender);
    }

    #[tokio::test]
    async fn test_parse_error_restarts_with_new_attempt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Stream(
                200,
                vec![
                    sse_frame(&chat_chunk("partial", None)),
                    Ok(Bytes::from_static(b"data: {not json\n\n")),
                ],
            ),
            Scripted::Stream(
                200,
                sse(&[chat_chunk("whole", None), chat_chunk(" answer", Some("stop"))]),
            ),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello().with_options(streaming())).await;

        assert!(outcome.errors.is_empty());
        let attempts: Vec<u32> = outcome.progress.iter().map(|p| p.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 2]);

        let mut acc = DeltaAccumulator::new();
        for event in &outcome.progress {
            acc.push(event);
        }
        assert_eq!(acc.attempt(), 2);
        assert_eq!(acc.result().unwrap().first_content(), Some("whole answer"));
    }

    #[tokio::test]
    async fn test_parse_errors_exhaust_budget() {
        let garbage = || Scripted::Stream(200, vec![Ok(Bytes::from_static(b"data: oops\n\n"))]);
        let transport = Arc::new(ScriptedTransport::new(vec![
            garbage(),
            garbage(),
            garbage(),
            garbage(),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello().with_options(streaming())).await;

        assert_eq!(transport.request_count(), 4);
        assert_eq!(outcome.errors, vec![CompletionError::unknown("Cannot parse response.")]);
    }

    #[tokio::test]
    async fn test_error_event_in_stream() {
        let event = error_body("The server had an error", "server_error");
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Stream(200, vec![sse_frame(&event)]),
            Scripted::Stream(200, vec![sse_frame(&event)]),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone())
            .with_retry_policy(RetryPolicy::new(1));

        let outcome = run_chat(&driver, hello().with_options(streaming())).await;

        assert_eq!(transport.request_count(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind(), CompletionErrorKind::Unknown);
        assert!(outcome.errors[0].message().starts_with("Error: {"));
        assert!(outcome.errors[0].message().contains("The server had an error"));
    }

    #[tokio::test]
    async fn test_stream_failure_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Stream(
                200,
                vec![Err(TransportError::Stream("connection reset".to_string()))],
            ),
            Scripted::Stream(200, sse(&[chat_chunk("ok", Some("stop"))])),
        ]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello().with_options(streaming())).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.progress.len(), 1);
        assert_eq!(outcome.progress[0].attempt, 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Fail(
            TransportError::Network("dns lookup failed".to_string()),
        )]));
        let driver = ChatCompletionDriver::new(transport.clone());

        let outcome = run_chat(&driver, hello()).await;

        assert_eq!(transport.request_count(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind(), CompletionErrorKind::Unknown);
        assert!(outcome.errors[0].cause().is_some());
    }

    #[tokio::test]
    async fn test_overrides_reach_request_body() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Json(
            200,
            chat_response("ok"),
        )]));
        let driver = ChatCompletionDriver::new(transport.clone());
        let params = hello().with_options(
            ChatCompletionOptions::default()
                .with_model("gpt-4")
                .with_temperature(0.2),
        );

        run_chat(&driver, params).await;

        let body = &transport.requests()[0].body;
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], false);
        assert_eq!(body["top_p"], json!(0.9f32));
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }
}
