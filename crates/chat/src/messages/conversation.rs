use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a `/conversation` request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// The conversation so far, oldest first. The last message is usually the user's question.
    pub messages: Vec<ConversationMessage>,
    /// Opaque conversation metadata echoed back on every response envelope.
    #[serde(default)]
    pub history_metadata: Map<String, Value>,
}

/// One message of a conversation, keyed by its role.
///
/// Every role carries only the fields that are meaningful for it. Unknown keys the
/// frontend stores alongside messages (`id`, `date`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationMessage {
    System(TextMessage),
    User(TextMessage),
    Assistant(AssistantMessage),
    Function(FunctionMessage),
    /// Citations and other tool output produced by the provider's retrieval step.
    Tool(ToolMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
            Role::Tool => "tool",
        };

        f.write_str(role)
    }
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(TextMessage {
            content: MessageContent::Text(content.into()),
        })
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User(TextMessage {
            content: MessageContent::Text(content.into()),
        })
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System(_) => Role::System,
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
            Self::Function(_) => Role::Function,
            Self::Tool(_) => Role::Tool,
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool(_))
    }

    /// The textual content, if the message has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System(message) | Self::User(message) => message.content.as_text(),
            Self::Assistant(message) => message.content(),
            Self::Function(message) => Some(&message.content),
            Self::Tool(message) => message.content.as_deref(),
        }
    }
}

/// Content of a system or user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    /// Multi-part content, e.g. text together with images.
    Parts(Vec<Value>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub content: MessageContent,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

/// An assistant turn: either text, or a function invocation with no text.
///
/// The content is null only when a function call is present; this is checked when the
/// message is deserialized and guaranteed by the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAssistantMessage")]
pub struct AssistantMessage {
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Value>,
}

#[derive(Deserialize)]
struct RawAssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
    #[serde(default)]
    context: Option<Value>,
}

impl TryFrom<RawAssistantMessage> for AssistantMessage {
    type Error = String;

    fn try_from(raw: RawAssistantMessage) -> Result<Self, Self::Error> {
        if raw.content.is_none() && raw.function_call.is_none() {
            return Err("assistant message content can only be null when it carries a function_call".to_string());
        }

        Ok(Self {
            content: raw.content,
            name: raw.name,
            function_call: raw.function_call,
            context: raw.context,
        })
    }
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            name: None,
            function_call: None,
            context: None,
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            content: None,
            name: None,
            function_call: Some(call),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn called_function(&self) -> Option<&FunctionCall> {
        self.function_call.as_ref()
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }
}

/// The result of a function invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMessage {
    #[serde(default)]
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}
