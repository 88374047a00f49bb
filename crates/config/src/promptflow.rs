//! Promptflow endpoint configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// A deployed promptflow answering in place of the chat completion deployment.
///
/// Promptflow answers in one piece, so conversations are never streamed while it is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptflowConfig {
    /// Scoring endpoint of the flow.
    pub endpoint: Url,
    /// Sent as a bearer token.
    pub api_key: SecretString,
    /// Seconds to wait for the flow to answer.
    #[serde(default = "default_response_timeout")]
    pub response_timeout: f64,
    /// Input field holding the user's question.
    #[serde(default = "default_request_field_name")]
    pub request_field_name: String,
    /// Output field holding the answer.
    #[serde(default = "default_response_field_name")]
    pub response_field_name: String,
    /// Output field holding the retrieved documents.
    #[serde(default = "default_citations_field_name")]
    pub citations_field_name: String,
}

impl PromptflowConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout)
    }
}

fn default_response_timeout() -> f64 {
    30.0
}

fn default_request_field_name() -> String {
    "query".to_string()
}

fn default_response_field_name() -> String {
    "reply".to_string()
}

fn default_citations_field_name() -> String {
    "documents".to_string()
}
