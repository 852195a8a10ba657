//! Completion Relay - streaming completion engine for OpenAI-style APIs
//!
//! Drives chat and single-prompt completions over a pluggable transport:
//! SSE framing, delta merging, bounded retries and caller-driven
//! cancellation, with a uniform error taxonomy for every failure.

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;

pub use api::{
    ChatCompletionOptions, ChatMessage, DeltaAccumulator, StreamDelta, TextCompletionOptions,
    TextCompletionResponse,
};
pub use client::{HttpClient, Transport};
pub use config::{ClientConfig, ConfigLoader};
pub use engine::{
    ChatCompletionDriver, ChatCompletionParams, ChatProgress, RetryPolicy, TextCompletionDriver,
    TextCompletionParams,
};
pub use error::{CompletionError, CompletionErrorKind, RelayError, Result};
pub use tokio_util::sync::CancellationToken;

/// Both completion drivers sharing one transport
pub struct CompletionClient<T = HttpClient> {
    chat: ChatCompletionDriver<Arc<T>>,
    text: TextCompletionDriver<Arc<T>>,
}

impl CompletionClient<HttpClient> {
    /// Create a client from `.env` and the default config locations
    pub fn new() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config())
    }

    /// Create a client with a custom config path
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config())
    }

    /// Create a client from a config object
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpClient::new(&config)?;
        tracing::debug!(
            base_url = transport.base_url(),
            max_retries = config.max_retries,
            "completion client ready"
        );
        Ok(Self::with_transport(transport, config.retry_policy()))
    }
}

impl<T: Transport> CompletionClient<T> {
    pub fn with_transport(transport: T, retry: RetryPolicy) -> Self {
        let transport = Arc::new(transport);
        Self {
            chat: ChatCompletionDriver::new(transport.clone()).with_retry_policy(retry.clone()),
            text: TextCompletionDriver::new(transport).with_retry_policy(retry),
        }
    }

    pub fn with_chat_defaults(mut self, defaults: ChatCompletionOptions) -> Self {
        self.chat = self.chat.with_defaults(defaults);
        self
    }

    pub fn with_text_defaults(mut self, defaults: TextCompletionOptions) -> Self {
        self.text = self.text.with_defaults(defaults);
        self
    }

    pub fn chat_driver(&self) -> &ChatCompletionDriver<Arc<T>> {
        &self.chat
    }

    pub fn text_driver(&self) -> &TextCompletionDriver<Arc<T>> {
        &self.text
    }

    /// See [`ChatCompletionDriver::run`]
    pub async fn chat<P, E>(&self, params: ChatCompletionParams, on_progress: P, on_error: E)
    where
        P: FnMut(ChatProgress),
        E: FnOnce(CompletionError),
    {
        self.chat.run(params, on_progress, on_error).await
    }

    /// First message content of a buffered chat completion
    pub async fn chat_simple(
        &self,
        params: ChatCompletionParams,
    ) -> std::result::Result<String, CompletionError> {
        engine::complete_chat_simple(&self.chat, params).await
    }

    /// See [`TextCompletionDriver::run`]
    pub async fn text<P, E>(&self, params: TextCompletionParams, on_progress: P, on_error: E)
    where
        P: FnMut(TextCompletionResponse),
        E: FnOnce(CompletionError),
    {
        self.text.run(params, on_progress, on_error).await
    }

    /// See [`TextCompletionDriver::complete`]
    pub async fn complete_text<P>(&self, params: TextCompletionParams, on_progress: P) -> String
    where
        P: FnMut(&str, bool),
    {
        self.text.complete(params, on_progress).await
    }

    pub async fn complete_text_simple(
        &self,
        params: TextCompletionParams,
    ) -> std::result::Result<String, CompletionError> {
        engine::complete_text_simple(&self.text, params).await
    }
}
