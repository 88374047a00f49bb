use std::sync::Arc;

use async_trait::async_trait;
use config::FunctionsConfig;
use reqwest::Client;
use serde::Serialize;
use url::Url;

use super::FunctionRegistry;
use crate::error::{ChatError, ChatResult};

/// Executes function calls requested by the model.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    /// Runs the function and returns its textual result.
    ///
    /// `Ok(None)` means the call was not made: function calling is disabled, or the
    /// function is not in the allow-list.
    async fn execute(&self, name: &str, arguments: &str) -> ChatResult<Option<String>>;
}

/// Calls functions hosted behind a single HTTP endpoint.
pub struct RemoteFunctionExecutor {
    client: Client,
    endpoint: Option<Url>,
    registry: Arc<FunctionRegistry>,
}

#[derive(Serialize)]
struct ToolInvocation<'a> {
    tool_name: &'a str,
    tool_arguments: sonic_rs::Value,
}

impl RemoteFunctionExecutor {
    pub fn new(config: &FunctionsConfig, registry: Arc<FunctionRegistry>, client: Client) -> Self {
        let endpoint = config
            .tool_base_url
            .as_ref()
            .filter(|_| config.enabled)
            .map(|base| super::with_access_code(base, config.tool_key.as_ref()));

        Self {
            client,
            endpoint,
            registry,
        }
    }
}

#[async_trait]
impl FunctionExecutor for RemoteFunctionExecutor {
    async fn execute(&self, name: &str, arguments: &str) -> ChatResult<Option<String>> {
        let Some(ref endpoint) = self.endpoint else {
            return Ok(None);
        };

        if !self.registry.contains(name) {
            log::warn!("The model requested unknown function '{name}', skipping it");
            return Ok(None);
        }

        let tool_arguments = sonic_rs::from_str(arguments).map_err(|e| ChatError::MalformedToolArguments {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let body = sonic_rs::to_vec(&ToolInvocation {
            tool_name: name,
            tool_arguments,
        })
        .map_err(|e| ChatError::InternalError(Some(format!("Failed to serialize function call: {e}"))))?;

        log::debug!("Calling function '{name}'");

        let failed = |reason: String| ChatError::FunctionCallFailed {
            name: name.to_string(),
            reason,
        };

        let response = self
            .client
            .post(endpoint.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| failed(e.to_string()))?;

        if !status.is_success() {
            log::error!("Function '{name}' failed with status {status}: {text}");
            return Err(failed(format!("function host answered with status {status}")));
        }

        Ok(Some(text))
    }
}
