mod datasource;
mod functions;
mod loader;
mod openai;
mod promptflow;
mod server;
mod ui;

use std::path::Path;

use serde::Deserialize;

pub use datasource::DataSourceConfig;
pub use functions::FunctionsConfig;
pub use openai::{MINIMUM_SUPPORTED_API_VERSION, OpenAiConfig};
pub use promptflow::PromptflowConfig;
pub use server::{HealthConfig, ServerConfig, TlsServerConfig};
pub use ui::UiConfig;

/// Main configuration structure for the chat gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Completion provider settings.
    pub openai: OpenAiConfig,
    /// Remote function calling settings.
    #[serde(default)]
    pub functions: FunctionsConfig,
    /// Promptflow endpoint answering instead of the completion deployment.
    #[serde(default)]
    pub promptflow: Option<PromptflowConfig>,
    /// Retrieval augmentation source, if any.
    #[serde(default)]
    pub datasource: Option<DataSourceConfig>,
    /// End-user security context forwarding.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Settings exposed to the web frontend.
    #[serde(default)]
    pub ui: UiConfig,
}

impl Config {
    /// Load configuration from a file path, expanding `{{ env.NAME }}` placeholders
    /// and validating the result.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> anyhow::Result<Config> {
        loader::parse(content)
    }
}

/// Settings for the end-user security context attached to provider requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Forward user identity and source address to the provider for threat protection.
    pub ms_defender_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ms_defender_enabled: true,
        }
    }
}
