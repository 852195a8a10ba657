//! Legacy Text Completion API
//!
//! Request and response shapes for the single-prompt completion endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::api::completion::{strip_reserved, Usage};
use crate::api::streaming::FinishReason;

/// Sampling options for a single-prompt completion; all optional so one
/// record serves as defaults and as overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_of: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Additional parameters (provider-specific)
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TextCompletionOptions {
    /// Driver defaults: text-davinci-003, temperature 0.7, 512 tokens, top_p 0.9
    pub fn defaults() -> Self {
        Self {
            model: Some("text-davinci-003".to_string()),
            temperature: Some(0.7),
            max_tokens: Some(512),
            top_p: Some(0.9),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stream: Some(false),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Layer `self` (the overrides) over `defaults`. Set fields win.
    pub fn merged_over(self, defaults: &TextCompletionOptions) -> TextCompletionOptions {
        let mut extra = defaults.extra.clone();
        extra.extend(self.extra);

        TextCompletionOptions {
            model: self.model.or_else(|| defaults.model.clone()),
            suffix: self.suffix.or_else(|| defaults.suffix.clone()),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            n: self.n.or(defaults.n),
            logprobs: self.logprobs.or(defaults.logprobs),
            echo: self.echo.or(defaults.echo),
            stop: self.stop.or_else(|| defaults.stop.clone()),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            best_of: self.best_of.or(defaults.best_of),
            user: self.user.or_else(|| defaults.user.clone()),
            stream: self.stream.or(defaults.stream),
            extra,
        }
    }
}

/// Single-prompt completion request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionRequest {
    pub model: String,

    #[serde(flatten)]
    pub options: TextCompletionOptions,

    pub stream: bool,

    pub prompt: String,
}

impl TextCompletionRequest {
    /// Merge caller overrides over the defaults, then attach the prompt.
    pub fn build(
        defaults: &TextCompletionOptions,
        overrides: TextCompletionOptions,
        prompt: impl Into<String>,
    ) -> Self {
        let mut options = overrides.merged_over(defaults);
        strip_reserved(&mut options.extra);

        let model = options
            .model
            .take()
            .unwrap_or_else(|| "text-davinci-003".to_string());
        let stream = options.stream.take().unwrap_or(false);

        Self {
            model,
            options,
            stream,
            prompt: prompt.into(),
        }
    }
}

/// A choice in a single-prompt completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChoice {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,

    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Single-prompt completion response; streamed chunks share this shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub object: String,

    #[serde(default)]
    pub created: u64,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<TextChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextCompletionResponse {
    /// Text of the first choice
    pub fn text(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.text.as_deref())
    }
}
