//! Legacy Text Completion Driver
//!
//! Single-prompt completions. [`TextCompletionDriver::run`] reports through
//! the same outcome taxonomy as the chat driver. [`TextCompletionDriver::complete`]
//! keeps the older running-text contract: it resolves with the accumulated
//! text, or an empty string on any failure.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::completion::ErrorEnvelope;
use crate::api::sse::{parse_payload, SseLines, SsePayload};
use crate::api::streaming::FinishReason;
use crate::api::text::{TextCompletionOptions, TextCompletionRequest, TextCompletionResponse};
use crate::client::transport::{
    Endpoint, RequestOptions, ResponseBody, ResponseMode, Transport, TransportRequest,
};
use crate::engine::cancel::{Cancellation, STREAM_ABORTED_MESSAGE};
use crate::engine::state::{RequestAttemptState, RetryPolicy};
use crate::engine::{
    classify_http_error, dispatch, preview, retry_or_report, Flow, RetryRequest, Step,
};
use crate::error::{CompletionError, CANNOT_PARSE_MESSAGE, STREAM_ERROR_MESSAGE};

const CALL: &str = "text";

/// Inputs of one logical text completion
#[derive(Debug, Clone, Default)]
pub struct TextCompletionParams {
    pub prompt: String,

    /// Overrides merged over the driver defaults
    pub options: TextCompletionOptions,

    pub cancel: Option<CancellationToken>,

    pub request_options: RequestOptions,
}

impl TextCompletionParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: TextCompletionOptions) -> Self {
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

/// Text completion driver
pub struct TextCompletionDriver<T> {
    transport: T,
    defaults: TextCompletionOptions,
    retry: RetryPolicy,
}

impl<T: Transport> TextCompletionDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            defaults: TextCompletionOptions::defaults(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: TextCompletionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn defaults(&self) -> &TextCompletionOptions {
        &self.defaults
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn transport_request(
        &self,
        prompt: String,
        options: &TextCompletionOptions,
        request_options: &RequestOptions,
    ) -> Result<TransportRequest, CompletionError> {
        let request = TextCompletionRequest::build(&self.defaults, options.clone(), prompt);
        debug!(model = %request.model, stream = request.stream, "dispatching text completion");

        let mode = if request.stream {
            ResponseMode::Stream
        } else {
            ResponseMode::Json
        };
        let body = serde_json::to_value(&request)
            .map_err(|err| CompletionError::unknown_with_cause(err.to_string(), err))?;

        Ok(TransportRequest {
            endpoint: Endpoint::Completions,
            body,
            mode,
            options: request_options.clone(),
        })
    }

    /// Run one logical text completion, reporting each response or chunk.
    ///
    /// Non-200 statuses are retried like chat requests. Failures inside a
    /// stream end the call without a retry.
    pub async fn run<P, E>(&self, params: TextCompletionParams, mut on_progress: P, on_error: E)
    where
        P: FnMut(TextCompletionResponse),
        E: FnOnce(CompletionError),
    {
        let TextCompletionParams {
            prompt,
            options,
            cancel,
            request_options,
        } = params;
        let cancel = Cancellation::new(cancel);
        let mut state = RequestAttemptState::new(&self.retry, on_error);

        loop {
            let step = self
                .attempt(&prompt, &options, &request_options, &cancel, &mut on_progress)
                .await;

            match step {
                Step::Done => return,
                Step::Fail(err) => {
                    debug!(attempt = state.attempt(), error = %err, "text completion failed");
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
        prompt: &str,
        options: &TextCompletionOptions,
        request_options: &RequestOptions,
        cancel: &Cancellation,
        on_progress: &mut P,
    ) -> Step
    where
        P: FnMut(TextCompletionResponse),
    {
        let request = match self.transport_request(prompt.to_string(), options, request_options) {
            Ok(request) => request,
            Err(err) => return Step::Fail(err),
        };

        let response = match dispatch(&self.transport, request, cancel).await {
            Ok(response) => response,
            Err(err) => return Step::Fail(err),
        };

        if !response.is_ok() {
            return classify_http_error(response);
        }

        match response.body {
            ResponseBody::Json(value) => match serde_json::from_value::<TextCompletionResponse>(value) {
                Ok(response) => {
                    on_progress(response);
                    Step::Done
                }
                Err(err) => {
                    warn!(error = %err, "could not parse text completion response");
                    Step::Retry(RetryRequest::new(
                        format!("unparseable response: {err}"),
                        CompletionError::unknown(CANNOT_PARSE_MESSAGE),
                    ))
                }
            },
            ResponseBody::Stream(body) => {
                let mut lines = SseLines::new(body);
                loop {
                    let next = match cancel.guard(lines.next()).await {
                        Some(next) => next,
                        None => return Step::Fail(CompletionError::aborted(STREAM_ABORTED_MESSAGE)),
                    };

                    match next {
                        None => return Step::Done,
                        Some(Err(err)) => {
                            if cancel.is_cancelled() {
                                return Step::Fail(CompletionError::aborted(STREAM_ABORTED_MESSAGE));
                            }
                            return Step::Fail(CompletionError::unknown_with_cause(
                                STREAM_ERROR_MESSAGE,
                                err,
                            ));
                        }
                        Some(Ok(payload)) => match parse_payload::<TextCompletionResponse>(&payload) {
                            Ok(SsePayload::Data(chunk)) => on_progress(chunk),
                            Ok(SsePayload::Error(body)) => {
                                let json = serde_json::to_string(&body)
                                    .unwrap_or_else(|_| body.message.clone());
                                return Step::Fail(CompletionError::unknown(format!("Error: {json}")));
                            }
                            Err(err) => {
                                warn!(error = %err, payload = preview(&payload), "could not parse stream message");
                                return Step::Fail(CompletionError::unknown_with_cause(
                                    CANNOT_PARSE_MESSAGE,
                                    err,
                                ));
                            }
                        },
                    }
                }
            }
        }
    }

    /// Complete `params.prompt`, returning the accumulated text.
    ///
    /// `on_progress` sees the running text after each chunk and once more
    /// with `true` when the completion ends. Overloaded-server responses are
    /// retried with the partial text appended to the prompt. A buffered answer
    /// that stops for any reason other than `stop` is continued the same way,
    /// within the same retry budget. Every failure resolves to an empty string.
    pub async fn complete<P>(&self, params: TextCompletionParams, mut on_progress: P) -> String
    where
        P: FnMut(&str, bool),
    {
        let TextCompletionParams {
            prompt,
            options,
            cancel,
            request_options,
        } = params;
        let cancel = Cancellation::new(cancel);
        let mut state = RequestAttemptState::new(&self.retry, |err: CompletionError| {
            debug!(error = %err, "text completion resolved empty");
        });
        let mut text = String::new();

        loop {
            let request =
                match self.transport_request(format!("{prompt}{text}"), &options, &request_options) {
                    Ok(request) => request,
                    Err(err) => {
                        state.report(err);
                        return String::new();
                    }
                };

            let response = match dispatch(&self.transport, request, &cancel).await {
                Ok(response) => response,
                Err(err) => {
                    state.report(err);
                    return String::new();
                }
            };

            if !response.is_ok() {
                let status = response.status;
                let overloaded = match &response.body {
                    ResponseBody::Json(payload) => ErrorEnvelope::from_value(payload)
                        .map(|envelope| {
                            envelope.error.is_overloaded() && !envelope.error.is_insufficient_quota()
                        })
                        .unwrap_or(false),
                    ResponseBody::Stream(_) => false,
                };

                if !overloaded {
                    let err = match classify_http_error(response) {
                        Step::Fail(err) => err,
                        _ => CompletionError::unknown(format!("Bad response {status}!")),
                    };
                    state.report(err);
                    return String::new();
                }

                let retry = RetryRequest::new(
                    "server overloaded",
                    CompletionError::unknown(format!("Bad response {status}!")),
                );
                match retry_or_report(&mut state, &cancel, retry, CALL).await {
                    Flow::Continue => continue,
                    Flow::Stop => return String::new(),
                }
            }

            match response.body {
                ResponseBody::Stream(body) => {
                    let mut lines = SseLines::new(body);
                    loop {
                        let next = match cancel.guard(lines.next()).await {
                            Some(next) => next,
                            None => {
                                state.report(CompletionError::aborted(STREAM_ABORTED_MESSAGE));
                                return String::new();
                            }
                        };

                        let payload = match next {
                            None => break,
                            Some(Ok(payload)) => payload,
                            Some(Err(err)) => {
                                state.report(CompletionError::unknown_with_cause(
                                    STREAM_ERROR_MESSAGE,
                                    err,
                                ));
                                return String::new();
                            }
                        };

                        match parse_payload::<TextCompletionResponse>(&payload) {
                            Ok(SsePayload::Data(chunk)) => {
                                if let Some(fragment) = chunk.text() {
                                    text.push_str(fragment);
                                    on_progress(&text, false);
                                }
                            }
                            _ => {
                                state.report(CompletionError::unknown(CANNOT_PARSE_MESSAGE));
                                return String::new();
                            }
                        }
                    }

                    on_progress(&text, true);
                    return text;
                }
                ResponseBody::Json(value) => {
                    let response = match serde_json::from_value::<TextCompletionResponse>(value) {
                        Ok(response) if response.choices.len() == 1 => response,
                        _ => {
                            state.report(CompletionError::unknown(CANNOT_PARSE_MESSAGE));
                            return String::new();
                        }
                    };

                    let choice = &response.choices[0];
                    let Some(fragment) = choice.text.as_deref() else {
                        state.report(CompletionError::unknown(CANNOT_PARSE_MESSAGE));
                        return String::new();
                    };
                    text.push_str(fragment);

                    let stopped = choice.finish_reason == Some(FinishReason::Stop);
                    if stopped || !state.try_retry() {
                        on_progress(&text, true);
                        return text;
                    }

                    debug!(
                        attempt = state.attempt(),
                        finish_reason = ?choice.finish_reason,
                        chars = text.len(),
                        "continuing truncated text completion"
                    );
                    on_progress(&text, false);
                }
            }
        }
    }
}
