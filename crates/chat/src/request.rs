use std::sync::Arc;

use config::{Config, DataSourceConfig, OpenAiConfig};
use context::UserSecurityContext;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{ChatError, ChatResult},
    functions::{FunctionRegistry, ToolDescriptor},
    messages::{ConversationMessage, FunctionMessage, Role},
};

/// Keys whose values never reach the logs.
const SECRET_KEYS: &[&str] = &["key", "connection_string", "embedding_key", "encoded_api_key", "api_key"];

const MASK: &str = "*****";

/// A chat completion request, in the provider's wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub messages: Vec<ConversationMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(flatten)]
    pub extra_body: ExtraBody,
}

/// Provider extensions, sent at the top level of the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtraBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<DataSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_security_context: Option<UserSecurityContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub parameters: Map<String, Value>,
}

impl From<&DataSourceConfig> for DataSource {
    fn from(config: &DataSourceConfig) -> Self {
        Self {
            kind: config.kind.clone(),
            parameters: config.parameters.clone(),
        }
    }
}

/// The request to send, and a copy of it that is safe to log.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub request: ModelRequest,
    pub redacted: ModelRequest,
}

/// Turns a client conversation into a provider request.
pub struct RequestBuilder {
    openai: OpenAiConfig,
    functions_enabled: bool,
    datasource: Option<DataSource>,
    registry: Arc<FunctionRegistry>,
}

impl RequestBuilder {
    pub fn new(config: &Config, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            openai: config.openai.clone(),
            functions_enabled: config.functions.enabled,
            datasource: config.datasource.as_ref().map(DataSource::from),
            registry,
        }
    }

    /// Builds the provider request for `conversation`.
    ///
    /// Tools are offered only if `offer_tools` is set and the conversation ends with a
    /// user message. The security context goes to the live request only.
    pub fn build(
        &self,
        conversation: &[ConversationMessage],
        security_context: Option<UserSecurityContext>,
        offer_tools: bool,
    ) -> ChatResult<BuiltRequest> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);

        // Data sources bring their own system framing.
        if self.datasource.is_none() {
            messages.push(ConversationMessage::system(self.openai.system_message.clone()));
        }

        for message in conversation {
            match message {
                ConversationMessage::System(_) | ConversationMessage::Tool(_) => continue,
                ConversationMessage::User(_) => messages.push(message.clone()),
                ConversationMessage::Assistant(assistant) => {
                    let context = parse_context(assistant.context())?;
                    messages.push(ConversationMessage::Assistant(assistant.clone().with_context(context)));
                }
                ConversationMessage::Function(function) => {
                    messages.push(ConversationMessage::Function(FunctionMessage {
                        context: parse_context(function.context.as_ref())?,
                        ..function.clone()
                    }));
                }
            }
        }

        let ends_with_user = messages.last().map(ConversationMessage::role) == Some(Role::User);

        let tools = (ends_with_user && offer_tools && self.functions_enabled && !self.registry.is_empty())
            .then(|| self.registry.descriptors().to_vec());

        let data_sources = self
            .datasource
            .as_ref()
            .filter(|_| ends_with_user)
            .map(|source| vec![source.clone()]);

        let request = ModelRequest {
            messages,
            temperature: self.openai.temperature,
            max_tokens: self.openai.max_tokens,
            top_p: self.openai.top_p,
            stop: self.openai.stop_sequence.clone(),
            stream: self.openai.stream,
            model: self.openai.model.clone(),
            tools,
            extra_body: ExtraBody {
                data_sources,
                user_security_context: None,
            },
        };

        let redacted = redact(&request);

        let mut request = request;
        request.extra_body.user_security_context = security_context;

        if log::log_enabled!(log::Level::Debug) {
            let body = sonic_rs::to_string_pretty(&redacted).unwrap_or_default();
            log::debug!("Request body: {body}");
        }

        Ok(BuiltRequest { request, redacted })
    }
}

/// Stored messages carry their context as a JSON-encoded string.
fn parse_context(context: Option<&Value>) -> ChatResult<Option<Value>> {
    match context {
        Some(Value::String(encoded)) => serde_json::from_str(encoded)
            .map(Some)
            .map_err(|e| ChatError::InvalidRequest(format!("message context is not valid JSON: {e}"))),
        other => Ok(other.cloned()),
    }
}

fn redact(request: &ModelRequest) -> ModelRequest {
    let mut redacted = request.clone();

    for source in redacted.extra_body.data_sources.iter_mut().flatten() {
        redact_secrets(&mut source.parameters);
    }

    redacted
}

fn redact_secrets(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        match value {
            Value::Null => (),
            _ if SECRET_KEYS.contains(&key.as_str()) => *value = Value::String(MASK.to_string()),
            Value::Object(nested) => redact_secrets(nested),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        redact_secrets(nested);
                    }
                }
            }
            _ => (),
        }
    }
}
