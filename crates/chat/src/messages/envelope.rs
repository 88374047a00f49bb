use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::conversation::ConversationMessage;

/// The client facing response shape, identical for streamed and non-streamed answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub object: String,
    pub choices: Vec<EnvelopeChoice>,
    pub history_metadata: Map<String, Value>,
    /// Provider diagnostic id of the completion call that produced this envelope.
    #[serde(rename = "apim-request-id")]
    pub apim_request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeChoice {
    pub messages: Vec<ConversationMessage>,
    pub end_turn: bool,
}

impl ResponseEnvelope {
    /// Text of the assistant messages of this envelope, in order.
    pub fn assistant_content(&self) -> String {
        self.choices
            .iter()
            .flat_map(|choice| &choice.messages)
            .filter_map(|message| match message {
                ConversationMessage::Assistant(message) => message.content(),
                _ => None,
            })
            .collect()
    }
}
