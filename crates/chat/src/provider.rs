mod azure_openai;
pub(crate) mod http_client;
mod promptflow;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use azure_openai::AzureOpenAiProvider;
pub use promptflow::PromptflowProvider;

use crate::{
    error::ChatResult,
    messages::{ChatCompletion, CompletionChunk},
    request::ModelRequest,
};

/// Chunks of a streamed completion, in provider emission order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChatResult<CompletionChunk>> + Send>>;

/// A provider response together with the provider's diagnostic id for the call.
pub struct Dispatched<T> {
    pub response: T,
    pub correlation_id: Option<String>,
}

/// A chat completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Sends the request and waits for the whole completion.
    async fn complete(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChatCompletion>>;

    /// Sends the request and returns the completion as it is produced.
    ///
    /// The stream is single-pass: once consumed it cannot be replayed.
    async fn stream(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChunkStream>>;
}
