use std::sync::Arc;

use crate::{
    error::ChatResult,
    messages::ChatCompletion,
    provider::{ChunkStream, Dispatched, Provider},
    request::ModelRequest,
};

/// Issues single provider calls. Failures are returned as they are, never retried.
#[derive(Clone)]
pub struct CompletionDispatcher {
    provider: Arc<dyn Provider>,
}

impl CompletionDispatcher {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub async fn complete(&self, request: ModelRequest) -> ChatResult<Dispatched<ChatCompletion>> {
        let request = without_tool_messages(request);
        let dispatched = self.provider.complete(&request).await?;

        log::debug!(
            "Completion received with {} choices (apim-request-id: {})",
            dispatched.response.choices.len(),
            dispatched.correlation_id.as_deref().unwrap_or("none")
        );

        Ok(dispatched)
    }

    pub async fn stream(&self, request: ModelRequest) -> ChatResult<Dispatched<ChunkStream>> {
        let request = without_tool_messages(request);
        let dispatched = self.provider.stream(&request).await?;

        log::debug!(
            "Completion stream opened (apim-request-id: {})",
            dispatched.correlation_id.as_deref().unwrap_or("none")
        );

        Ok(dispatched)
    }
}

/// The provider rejects a tool message that does not follow the assistant tool call it answers.
fn without_tool_messages(mut request: ModelRequest) -> ModelRequest {
    request.messages.retain(|message| !message.is_tool());
    request
}
