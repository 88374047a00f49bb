use async_trait::async_trait;
use config::OpenAiConfig;
use eventsource_stream::Eventsource;
use futures::{StreamExt, future};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::{ChunkStream, Dispatched, Provider};
use crate::{
    error::{ChatError, ChatResult},
    messages::{ChatCompletion, CompletionChunk},
    request::ModelRequest,
};

const USER_AGENT: &str = "GitHubSampleWebApp/AsyncAzureOpenAI/1.0.0";

/// Response header carrying the diagnostic id of the call.
const CORRELATION_HEADER: &str = "apim-request-id";

const END_OF_STREAM: &str = "[DONE]";

/// Chat completions of an Azure OpenAI model deployment.
pub struct AzureOpenAiProvider {
    client: Client,
    url: Url,
    key: Option<SecretString>,
}

impl AzureOpenAiProvider {
    pub fn new(config: &OpenAiConfig, client: Client) -> ChatResult<Self> {
        let Some(endpoint) = config.endpoint() else {
            log::error!("No Azure OpenAI endpoint or resource configured");
            return Err(ChatError::InternalError(None));
        };

        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            endpoint.trim_end_matches('/'),
            config.model
        );

        let mut url = Url::parse(&url).map_err(|e| {
            log::error!("Invalid Azure OpenAI endpoint '{url}': {e}");
            ChatError::InternalError(None)
        })?;

        url.query_pairs_mut()
            .append_pair("api-version", &config.preview_api_version);

        Ok(Self {
            client,
            url,
            key: config.key.clone(),
        })
    }

    async fn send(&self, request: &ModelRequest) -> ChatResult<reqwest::Response> {
        // Serialize with sonic_rs, the request carries arbitrary data source parameters
        let body = sonic_rs::to_vec(request)
            .map_err(|e| ChatError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let mut request_builder = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header("x-ms-useragent", USER_AGENT)
            .body(body);

        if let Some(ref key) = self.key {
            request_builder = request_builder.header("api-key", key.expose_secret());
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| ChatError::ConnectionError(format!("Failed to send request to Azure OpenAI: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Azure OpenAI API error ({status}): {error_text}");

            return Err(ChatError::ProviderApiError {
                status: status.as_u16(),
                message: provider_message(&error_text),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for AzureOpenAiProvider {
    async fn complete(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChatCompletion>> {
        let response = self.send(request).await?;
        let correlation_id = correlation_id(&response);

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Azure OpenAI response body: {e}");
            ChatError::ConnectionError(e.to_string())
        })?;

        let completion = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Azure OpenAI chat completion response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", response_text.len());

            ChatError::InternalError(None)
        })?;

        Ok(Dispatched {
            response: completion,
            correlation_id,
        })
    }

    async fn stream(&self, request: &ModelRequest) -> ChatResult<Dispatched<ChunkStream>> {
        let response = self.send(request).await?;
        let correlation_id = correlation_id(&response);

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!matches!(event, Ok(event) if event.data == END_OF_STREAM)))
            .filter_map(|event| async move {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::error!("SSE error in Azure OpenAI stream: {e}");

                        return Some(Err(ChatError::ConnectionError(format!(
                            "Failed to read the completion stream: {e}"
                        ))));
                    }
                };

                if event.data.trim().is_empty() {
                    return None;
                }

                let chunk = sonic_rs::from_str::<CompletionChunk>(&event.data).map_err(|e| {
                    log::error!("Failed to parse Azure OpenAI streaming chunk: {e}");
                    ChatError::InternalError(Some(format!("Failed to parse a completion chunk: {e}")))
                });

                Some(chunk)
            });

        Ok(Dispatched {
            response: Box::pin(chunks),
            correlation_id,
        })
    }
}

fn correlation_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// The message of an Azure error document, or the raw body if it is not one.
fn provider_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorDocument {
        error: ErrorDetails,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        message: String,
    }

    sonic_rs::from_str::<ErrorDocument>(body)
        .map(|document| document.error.message)
        .unwrap_or_else(|_| body.to_string())
}
