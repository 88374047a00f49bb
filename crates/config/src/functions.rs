//! Remote function calling configuration.

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Settings for the remote function host that serves tool metadata and executes tools.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FunctionsConfig {
    /// Whether tool descriptors are offered to the model and tool calls are executed.
    pub enabled: bool,
    /// Endpoint returning the list of tool descriptors.
    pub tools_base_url: Option<Url>,
    /// Access code appended to the tool list request.
    pub tools_key: Option<SecretString>,
    /// Endpoint executing a single tool call.
    pub tool_base_url: Option<Url>,
    /// Access code appended to tool execution requests.
    pub tool_key: Option<SecretString>,
}
