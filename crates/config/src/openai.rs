//! Completion provider configuration.

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Oldest preview API version that supports data sources and streamed tool calls.
pub const MINIMUM_SUPPORTED_API_VERSION: &str = "2024-05-01-preview";

/// Azure OpenAI chat completion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// Full endpoint URL. Takes precedence over `resource`.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Resource name, expanded to `https://{resource}.openai.azure.com/`.
    #[serde(default)]
    pub resource: Option<String>,
    /// API key sent in the `api-key` header.
    #[serde(default)]
    pub key: Option<SecretString>,
    /// Model deployment name.
    #[serde(default)]
    pub model: String,
    /// API version sent as the `api-version` query parameter.
    #[serde(default = "default_api_version")]
    pub preview_api_version: String,
    /// System message prepended when no data source is configured.
    #[serde(default = "default_system_message")]
    pub system_message: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub stop_sequence: Option<Vec<String>>,
    /// Whether answers are streamed to the client as JSON lines.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl OpenAiConfig {
    /// The endpoint to send completion requests to, if one can be derived.
    pub fn endpoint(&self) -> Option<String> {
        match (&self.endpoint, &self.resource) {
            (Some(endpoint), _) => Some(endpoint.to_string()),
            (None, Some(resource)) if !resource.is_empty() => Some(format!("https://{resource}.openai.azure.com/")),
            _ => None,
        }
    }
}

fn default_api_version() -> String {
    MINIMUM_SUPPORTED_API_VERSION.to_string()
}

fn default_system_message() -> String {
    "You are an AI assistant that helps people find information.".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_stream() -> bool {
    true
}
