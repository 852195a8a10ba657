//! Simple Completion Helpers
//!
//! Collapse the callback drivers into a single awaited result.

use std::sync::OnceLock;

use crate::api::completion::ChatCompletionOptions;
use crate::client::transport::Transport;
use crate::engine::chat::{ChatCompletionDriver, ChatCompletionParams};
use crate::engine::text::{TextCompletionDriver, TextCompletionParams};
use crate::error::{CompletionError, NO_RESPONSE_MESSAGE};

const EMPTY_RESULT_MESSAGE: &str = "No response.";
const UNHANDLED_MESSAGE: &str = "Unhandled error";

/// Request a buffered chat completion and return its first message content.
///
/// Streaming is always turned off. The first progress event settles the
/// result: non-empty content resolves, anything else is a `NoResponse` error.
/// The driver's terminal error is returned as is.
pub async fn complete_chat_simple<T: Transport>(
    driver: &ChatCompletionDriver<T>,
    params: ChatCompletionParams,
) -> Result<String, CompletionError> {
    let ChatCompletionParams {
        messages,
        options,
        cancel,
        request_options,
    } = params;

    // Settling early cancels the rest of the call without touching the caller's token.
    let scope = cancel.map(|token| token.child_token()).unwrap_or_default();
    let params = ChatCompletionParams {
        messages,
        options: ChatCompletionOptions {
            stream: Some(false),
            ..options
        },
        cancel: Some(scope.clone()),
        request_options,
    };

    let outcome: OnceLock<Result<String, CompletionError>> = OnceLock::new();
    driver
        .run(
            params,
            |progress| {
                let content = progress
                    .delta
                    .first_content()
                    .filter(|content| !content.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| CompletionError::no_response(EMPTY_RESULT_MESSAGE));
                if outcome.set(content).is_ok() {
                    scope.cancel();
                }
            },
            |err| {
                let _ = outcome.set(Err(err));
            },
        )
        .await;

    outcome.into_inner().unwrap_or_else(|| {
        tracing::warn!("chat completion ended without a result");
        Err(CompletionError::unknown(UNHANDLED_MESSAGE))
    })
}

/// Run the running-text contract and map its empty-string failure to an error.
pub async fn complete_text_simple<T: Transport>(
    driver: &TextCompletionDriver<T>,
    params: TextCompletionParams,
) -> Result<String, CompletionError> {
    let text = driver.complete(params, |_, _| {}).await;
    if text.is_empty() {
        return Err(CompletionError::no_response(NO_RESPONSE_MESSAGE));
    }
    Ok(text)
}
