use std::collections::HashSet;

use config::FunctionsConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionDescriptor,
    /// Fields this crate does not interpret, forwarded to the model as they are.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Further settings such as `strict`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn function_type() -> String {
    "function".to_string()
}

/// The tools published by the function host, loaded once at startup.
///
/// The registry doubles as the allow-list: only functions named here are ever executed.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    tools: Vec<ToolDescriptor>,
    names: HashSet<String>,
}

impl FunctionRegistry {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let names = tools.iter().map(|tool| tool.function.name.clone()).collect();

        Self { tools, names }
    }

    /// Loads the tool list from the function host.
    ///
    /// A failing host does not prevent startup: the error is logged and the registry stays
    /// empty, so no tools are offered to the model.
    pub async fn fetch(client: &Client, config: &FunctionsConfig) -> Self {
        if !config.enabled {
            return Self::default();
        }

        let Some(ref base_url) = config.tools_base_url else {
            return Self::default();
        };

        let url = super::with_access_code(base_url, config.tools_key.as_ref());

        match fetch_tools(client, url).await {
            Ok(tools) => {
                let registry = Self::new(tools);
                log::info!("Loaded {} function tools: {}", registry.len(), registry.names().join(", "));

                registry
            }
            Err(e) => {
                log::error!("An error occurred while getting the function tools metadata: {e}");
                Self::default()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.function.name.as_str()).collect()
    }
}

async fn fetch_tools(client: &Client, url: url::Url) -> anyhow::Result<Vec<ToolDescriptor>> {
    let response = client.get(url).send().await?;
    let status = response.status();

    if !status.is_success() {
        anyhow::bail!("function host answered with status {status}");
    }

    let body = response.text().await?;

    Ok(sonic_rs::from_str(&body)?)
}
