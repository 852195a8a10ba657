//! Streaming Support
//!
//! Incremental chat completion fragments as delivered over Server-Sent Events,
//! and the reshaping of a one-shot response into the same form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::completion::{ChatCompletionResponse, FunctionCall, Role, Usage};

/// Why a choice stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop or stop sequence
    Stop,

    /// Token limit reached
    Length,

    /// The model produced a function call instead of text
    FunctionCall,

    ContentFilter,

    /// Any reason this crate does not know about
    #[serde(other)]
    Other,
}

/// One incremental unit of a streaming chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Response ID, shared by every delta of one response
    #[serde(default)]
    pub id: String,

    /// Object type
    #[serde(default)]
    pub object: String,

    /// Creation timestamp (seconds since the epoch)
    #[serde(default)]
    pub created: u64,

    /// Model name
    #[serde(default)]
    pub model: String,

    /// Choices with deltas
    #[serde(default)]
    pub choices: Vec<ChoiceDelta>,

    /// Usage info (only in final chunk for some providers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamDelta {
    /// Creation time, when the timestamp is representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.created).ok()?, 0)
    }

    /// Text increment of the first choice, if any
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }
}

/// One candidate's increment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    /// Candidate slot, stable across the stream
    #[serde(default)]
    pub index: Option<u32>,

    /// The partial message
    #[serde(default)]
    pub delta: DeltaMessage,

    /// Set once this candidate is done
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl ChoiceDelta {
    /// Index used for ordering; an absent index sorts as slot 0
    pub(crate) fn sort_key(&self) -> u32 {
        self.index.unwrap_or(0)
    }
}

/// Partial message fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    /// Role (usually only in first chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Content increment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Function call increment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDelta>,
}

/// Function call increment; name and arguments grow independently
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl FunctionCallDelta {
    pub(crate) fn is_empty(&self) -> bool {
        self.name.is_none() && self.arguments.is_none()
    }
}

impl From<FunctionCall> for FunctionCallDelta {
    fn from(call: FunctionCall) -> Self {
        Self {
            name: Some(call.name),
            arguments: Some(call.arguments),
        }
    }
}

/// A one-shot response reads like the final merged delta of an equivalent stream.
impl From<ChatCompletionResponse> for StreamDelta {
    fn from(response: ChatCompletionResponse) -> Self {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| {
                let delta = choice
                    .message
                    .map(|message| DeltaMessage {
                        role: Some(message.role),
                        content: message.content,
                        function_call: message.function_call.map(FunctionCallDelta::from),
                    })
                    .unwrap_or_default();

                ChoiceDelta {
                    index: choice.index,
                    delta,
                    finish_reason: choice.finish_reason,
                }
            })
            .collect();

        StreamDelta {
            id: response.id,
            object: response.object,
            created: response.created,
            model: response.model,
            choices,
            usage: response.usage,
        }
    }
}
