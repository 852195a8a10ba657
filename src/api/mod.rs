//! API Module
//!
//! Wire types for both completion styles, SSE parsing and delta merging.

pub mod completion;
pub mod merge;
pub mod sse;
pub mod streaming;
pub mod text;

pub use completion::{
    ApiErrorBody, ChatCompletionOptions, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, ErrorEnvelope, FunctionCall, FunctionCallDirective, FunctionDefinition,
    ResponseChoice, ResponseMessage, Role, Usage,
};
pub use merge::{all_choices_finished, concat_strings, merge_chat_stream_deltas, DeltaAccumulator};
pub use sse::{parse_payload, SseLineSplitter, SseLines, SsePayload, DONE_SENTINEL};
pub use streaming::{ChoiceDelta, DeltaMessage, FinishReason, FunctionCallDelta, StreamDelta};
pub use text::{TextChoice, TextCompletionOptions, TextCompletionRequest, TextCompletionResponse};
