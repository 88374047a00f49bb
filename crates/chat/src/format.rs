use serde_json::{Map, Value};

use crate::messages::{
    AssistantMessage, ChatCompletion, CompletionChunk, ConversationMessage, EnvelopeChoice, ResponseEnvelope,
    ToolMessage,
};

/// Builds client envelopes for the completions of one conversation request.
pub struct ResponseFormatter<'a> {
    history_metadata: &'a Map<String, Value>,
    correlation_id: Option<&'a str>,
}

impl<'a> ResponseFormatter<'a> {
    pub fn new(history_metadata: &'a Map<String, Value>, correlation_id: Option<&'a str>) -> Self {
        Self {
            history_metadata,
            correlation_id,
        }
    }

    /// The whole answer: citations, if any, followed by the assistant message.
    pub fn completion(&self, completion: &ChatCompletion) -> ResponseEnvelope {
        let mut messages = Vec::with_capacity(2);

        if let Some(choice) = completion.choices.first() {
            if let Some(ref context) = choice.message.context {
                messages.push(citations(context));
            }

            let content = choice.message.content.clone().unwrap_or_default();
            messages.push(ConversationMessage::Assistant(AssistantMessage::text(content)));
        }

        self.envelope(
            &completion.id,
            &completion.model,
            completion.created,
            &completion.object,
            messages,
            true,
        )
    }

    /// A fragment of the answer, or `None` if the chunk has nothing for the client.
    pub fn chunk(&self, chunk: &CompletionChunk) -> Option<ResponseEnvelope> {
        let choice = chunk.choices.first()?;
        let end_turn = choice.finish_reason.is_some();

        let message = choice.delta.as_ref().and_then(|delta| match (&delta.context, &delta.content) {
            (Some(context), _) => Some(citations(context)),
            (None, Some(content)) if !content.is_empty() => {
                Some(ConversationMessage::Assistant(AssistantMessage::text(content.clone())))
            }
            _ => None,
        });

        if message.is_none() && !end_turn {
            return None;
        }

        Some(self.envelope(
            &chunk.id,
            &chunk.model,
            chunk.created,
            &chunk.object,
            message.into_iter().collect(),
            end_turn,
        ))
    }

    fn envelope(
        &self,
        id: &str,
        model: &str,
        created: u64,
        object: &str,
        messages: Vec<ConversationMessage>,
        end_turn: bool,
    ) -> ResponseEnvelope {
        ResponseEnvelope {
            id: id.to_string(),
            model: model.to_string(),
            created,
            object: object.to_string(),
            choices: vec![EnvelopeChoice { messages, end_turn }],
            history_metadata: self.history_metadata.clone(),
            apim_request_id: self.correlation_id.map(str::to_string),
        }
    }
}

/// Retrieval output travels to the client as a tool message holding the JSON-encoded context.
fn citations(context: &Value) -> ConversationMessage {
    ConversationMessage::Tool(ToolMessage {
        content: Some(context.to_string()),
        tool_call_id: None,
        context: None,
    })
}
