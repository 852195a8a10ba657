//! Chat Completion API
//!
//! Request and response shapes for the chat-style completion endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::api::streaming::FinishReason;

/// Keys that callers may not smuggle in through pass-through parameters.
pub(crate) const RESERVED_KEYS: [&str; 4] = ["model", "messages", "prompt", "stream"];

pub(crate) fn strip_reserved(extra: &mut HashMap<String, Value>) {
    for key in RESERVED_KEYS {
        extra.remove(key);
    }
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message
    pub role: Role,

    /// Text content; absent for assistant messages that only call a function
    #[serde(default)]
    pub content: Option<String>,

    /// Optional name for the message author (required for function results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Function call made by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Result of a function call, fed back to the model
    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::with_role(Role::Function, content)
        }
    }
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// Function schema offered to the model. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,

    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameters schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Which function, if any, the model should call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionCallDirective {
    /// String values: "none", "auto"
    Mode(String),

    /// Force a specific function
    Named { name: String },
}

impl FunctionCallDirective {
    pub fn auto() -> Self {
        FunctionCallDirective::Mode("auto".to_string())
    }

    pub fn none() -> Self {
        FunctionCallDirective::Mode("none".to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        FunctionCallDirective::Named { name: name.into() }
    }
}

/// Sampling options for a chat completion.
///
/// Every field is optional so that one record can serve both as the default
/// parameters of a driver and as the caller's overrides; see
/// [`ChatCompletionOptions::merged_over`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Number of candidates to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<HashMap<String, f32>>,

    /// End-user identifier forwarded to the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Enable streaming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Function schemas the model may call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDirective>,

    /// Additional parameters (provider-specific)
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatCompletionOptions {
    /// Driver defaults: gpt-3.5-turbo, temperature 0.7, top_p 0.9, no penalties, no streaming
    pub fn defaults() -> Self {
        Self {
            model: Some("gpt-3.5-turbo".to_string()),
            temperature: Some(0.7),
            top_p: Some(0.9),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stream: Some(false),
            ..Self::default()
        }
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Offer functions to the model
    pub fn with_functions(mut self, functions: Vec<FunctionDefinition>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_function_call(mut self, directive: FunctionCallDirective) -> Self {
        self.function_call = Some(directive);
        self
    }

    /// Layer `self` (the overrides) over `defaults`. Set fields win.
    pub fn merged_over(self, defaults: &ChatCompletionOptions) -> ChatCompletionOptions {
        let mut extra = defaults.extra.clone();
        extra.extend(self.extra);

        ChatCompletionOptions {
            model: self.model.or_else(|| defaults.model.clone()),
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            n: self.n.or(defaults.n),
            stop: self.stop.or_else(|| defaults.stop.clone()),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            logit_bias: self.logit_bias.or_else(|| defaults.logit_bias.clone()),
            user: self.user.or_else(|| defaults.user.clone()),
            stream: self.stream.or(defaults.stream),
            functions: self.functions.or_else(|| defaults.functions.clone()),
            function_call: self.function_call.or_else(|| defaults.function_call.clone()),
            extra,
        }
    }
}

/// Chat completion request body, built fresh for every attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model identifier
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<HashMap<String, f32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDirective>,

    /// Additional parameters (provider-specific)
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,

    /// Messages in the conversation
    pub messages: Vec<ChatMessage>,
}

impl ChatCompletionRequest {
    /// Merge caller overrides over the defaults, then attach the messages.
    ///
    /// Messages always come from `messages`: pass-through extras named
    /// `messages`, `prompt`, `model` or `stream` are discarded.
    pub fn build(
        defaults: &ChatCompletionOptions,
        overrides: ChatCompletionOptions,
        messages: Vec<ChatMessage>,
    ) -> Self {
        let merged = overrides.merged_over(defaults);
        let mut extra = merged.extra;
        strip_reserved(&mut extra);

        Self {
            model: merged
                .model
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            temperature: merged.temperature,
            top_p: merged.top_p,
            n: merged.n,
            stop: merged.stop,
            max_tokens: merged.max_tokens,
            presence_penalty: merged.presence_penalty,
            frequency_penalty: merged.frequency_penalty,
            logit_bias: merged.logit_bias,
            user: merged.user,
            stream: merged.stream.unwrap_or(false),
            functions: merged.functions,
            function_call: merged.function_call,
            extra,
            messages,
        }
    }
}

/// Message as returned by a non-streaming chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: Role,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

/// A choice in the completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    /// Choice index
    #[serde(default)]
    pub index: Option<u32>,

    /// The message
    #[serde(default)]
    pub message: Option<ResponseMessage>,

    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Token usage information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,

    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,

    /// Total tokens
    pub total_tokens: u32,
}

/// Chat completion response (non-streaming)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response ID
    pub id: String,

    /// Object type
    pub object: String,

    /// Creation timestamp
    pub created: u64,

    /// Model used
    pub model: String,

    /// Response choices
    pub choices: Vec<ResponseChoice>,

    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// Get the first message content
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

/// Error body inside an [`ErrorEnvelope`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(rename = "type", default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub param: Option<Value>,

    #[serde(default)]
    pub code: Option<Value>,
}

impl ApiErrorBody {
    pub fn is_insufficient_quota(&self) -> bool {
        self.error_type.as_deref() == Some("insufficient_quota")
    }

    pub fn is_overloaded(&self) -> bool {
        self.message.contains("currently overloaded")
    }
}

/// Conventional `{"error": {...}}` envelope used by the API for failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

impl ErrorEnvelope {
    /// Recognize an error envelope in arbitrary JSON.
    ///
    /// Any object with a non-null `error` member counts; when the member does
    /// not have the conventional shape its JSON text becomes the message.
    pub fn from_value(value: &Value) -> Option<Self> {
        let error = value.as_object()?.get("error")?;
        if error.is_null() {
            return None;
        }

        let body = serde_json::from_value::<ApiErrorBody>(error.clone()).unwrap_or_else(|_| {
            ApiErrorBody {
                message: match error {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                ..ApiErrorBody::default()
            }
        });

        Some(Self { error: body })
    }
}
