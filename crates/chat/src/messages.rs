//! Message types shared by the pipeline stages.
//!
//! - [`conversation`]: what the client sends and what the provider receives
//! - [`completion`]: what the provider returns, as a whole or chunk by chunk
//! - [`envelope`]: what the client receives

pub(crate) mod completion;
pub(crate) mod conversation;
pub(crate) mod envelope;

pub use completion::{
    ChatCompletion, ChunkChoice, CompletionChoice, CompletionChunk, Delta, FinishReason, FunctionFragment,
    ResponseMessage, ToolCall, ToolCallFragment,
};
pub use conversation::{
    AssistantMessage, ChatRequest, ConversationMessage, FunctionCall, FunctionMessage, MessageContent, Role,
    TextMessage, ToolMessage,
};
pub use envelope::{EnvelopeChoice, ResponseEnvelope};
