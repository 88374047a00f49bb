use async_trait::async_trait;
use config::PromptflowConfig;
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use url::Url;

use super::{ChunkStream, Dispatched, Provider};
use crate::{
    error::{ChatError, ChatResult},
    messages::{ChatCompletion, CompletionChoice, ConversationMessage, FinishReason, ResponseMessage},
    request::ModelRequest,
};

/// A deployed promptflow, scored with the latest question and the earlier turns.
///
/// Flows answer in one piece; streaming is not supported.
pub struct PromptflowProvider {
    client: Client,
    endpoint: Url,
    key: SecretString,
    request_field: String,
    response_field: String,
    citations_field: String,
}

impl PromptflowProvider {
    pub fn new(config: &PromptflowConfig, client: Client) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            key: config.api_key.clone(),
            request_field: config.request_field_name.clone(),
            response_field: config.response_field_name.clone(),
            citations_field: config.citations_field_name.clone(),
        }
    }

    /// `{<request field>: question, chat_history: [{inputs, outputs}, ...]}`
    fn flow_input(&self, messages: &[ConversationMessage]) -> ChatResult<Value> {
        let mut turns: Vec<(Value, Value)> = Vec::new();

        for message in messages {
            match message {
                ConversationMessage::User(user) => {
                    let question = serde_json::to_value(&user.content)
                        .map_err(|e| ChatError::InvalidRequest(format!("Invalid user message: {e}")))?;

                    turns.push((question, Value::String(String::new())));
                }
                ConversationMessage::Assistant(assistant) => {
                    if let (Some(turn), Some(answer)) = (turns.last_mut(), assistant.content()) {
                        turn.1 = Value::String(answer.to_string());
                    }
                }
                _ => {}
            }
        }

        let Some((question, _)) = turns.pop() else {
            return Err(ChatError::InvalidRequest(
                "The conversation has no user message for the flow".to_string(),
            ));
        };

        let chat_history: Vec<Value> = turns
            .into_iter()
            .map(|(question, answer)| {
                json!({
                    "inputs": { self.request_field.as_str(): question },
                    "outputs": { self.response_field.as_str(): answer },
                })
            })
            .collect();

        let mut input = Map::new();
        input.insert(self.request_field.clone(), question);
        input.insert("chat_history".to_string(), Value::Array(chat_history));

        Ok(Value::Object(input))
    }

    /// Maps the flow outputs onto a completion: the answer becomes the assistant content,
    /// the documents become the retrieval context.
    fn completion(&self, mut outputs: Map<String, Value>) -> ChatResult<ChatCompletion> {
        if let Some(error) = outputs.remove("error") {
            log::error!("Promptflow endpoint answered with an error: {error}");
            return Err(ChatError::InternalError(Some(format!("Promptflow error: {error}"))));
        }

        let content = outputs.remove(&self.response_field).map(|answer| match answer {
            Value::String(answer) => answer,
            other => other.to_string(),
        });

        let context = outputs
            .remove(&self.citations_field)
            .map(|documents| json!({ "citations": documents }));

        let id = match outputs.remove("id") {
            Some(Value::String(id)) => id,
            _ => String::new(),
        };

        Ok(ChatCompletion {
            id,
            choices: vec![CompletionChoice {
                index: 0,
                message: ResponseMessage {
                    role: Some("assistant".to_string()),
                    content,
                    tool_calls: None,
                    context,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            ..Default::default()
        })
    }
}

#[async_trait]
impl Provider for PromptflowProvider {
    async fn complete(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChatCompletion>> {
        let input = self.flow_input(&request.messages)?;

        let body = sonic_rs::to_vec(&input)
            .map_err(|e| ChatError::InternalError(Some(format!("Failed to serialize flow input: {e}"))))?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.key.expose_secret()))
            .body(body)
            .send()
            .await
            .map_err(|e| ChatError::ConnectionError(format!("Failed to send request to the promptflow endpoint: {e}")))?;

        let status = response.status();

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read the promptflow response body: {e}");
            ChatError::ConnectionError(e.to_string())
        })?;

        if !status.is_success() {
            log::error!("Promptflow endpoint error ({status}): {text}");

            return Err(ChatError::ProviderApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        let outputs: Map<String, Value> = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse the promptflow response: {e}");
            ChatError::InternalError(None)
        })?;

        Ok(Dispatched {
            response: self.completion(outputs)?,
            correlation_id: None,
        })
    }

    async fn stream(&self, _request: &ModelRequest) -> ChatResult<Dispatched<ChunkStream>> {
        Err(ChatError::InternalError(Some(
            "Promptflow answers are not streamed".to_string(),
        )))
    }
}
