//! The conversation endpoint: turns a chat request into one or more completion calls,
//! executes the functions the model asks for, and answers as JSON or JSON lines.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use context::{AuthenticatedUser, UserSecurityContext};
use futures::StreamExt;

mod dispatch;
mod error;
mod format;
mod frontend;
mod function_call;
pub mod functions;
pub mod messages;
mod ndjson;
mod orchestrator;
pub mod provider;
mod request;

pub use dispatch::CompletionDispatcher;
pub use error::{ChatError, ChatResult as Result};
pub use format::ResponseFormatter;
pub use frontend::FrontendSettings;
pub use function_call::{AccumulatedToolCall, FunctionCallState, Step, accumulate, resolve};
pub use ndjson::frame;
pub use orchestrator::{Answer, ConversationOrchestrator, EnvelopeStream, MAX_FUNCTION_ROUNDS};
pub use request::{BuiltRequest, DataSource, ExtraBody, ModelRequest, RequestBuilder};

use crate::{
    functions::{FunctionRegistry, RemoteFunctionExecutor},
    messages::ChatRequest,
    provider::{AzureOpenAiProvider, PromptflowProvider, Provider, http_client::default_http_client_builder},
};

struct ChatState {
    orchestrator: Arc<ConversationOrchestrator>,
    frontend_settings: FrontendSettings,
    application_name: String,
    ms_defender_enabled: bool,
}

/// Creates an axum router for the conversation endpoints.
///
/// Loads the function tool list from the function host when function calling is enabled.
pub async fn router(config: &config::Config) -> anyhow::Result<Router> {
    let client = default_http_client_builder(HeaderMap::new())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

    let registry = Arc::new(FunctionRegistry::fetch(&client, &config.functions).await);

    let provider: Arc<dyn Provider> = match config.promptflow {
        Some(ref promptflow) => {
            // Flows may take far longer than a completion to answer.
            let client = default_http_client_builder(HeaderMap::new())
                .timeout(promptflow.response_timeout())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create the promptflow HTTP client: {e}"))?;

            log::info!("Answering with the promptflow endpoint at {}", promptflow.endpoint);

            Arc::new(PromptflowProvider::new(promptflow, client))
        }
        None => Arc::new(
            AzureOpenAiProvider::new(&config.openai, client.clone())
                .map_err(|e| anyhow::anyhow!("Failed to initialize the Azure OpenAI provider: {e}"))?,
        ),
    };

    let executor = RemoteFunctionExecutor::new(&config.functions, registry.clone(), client);

    let orchestrator = ConversationOrchestrator::new(config, registry, provider, Arc::new(executor));

    let state = Arc::new(ChatState {
        orchestrator: Arc::new(orchestrator),
        frontend_settings: FrontendSettings::from(config),
        application_name: config.ui.title.clone(),
        ms_defender_enabled: config.security.ms_defender_enabled,
    });

    Ok(Router::new()
        .route("/conversation", post(conversation))
        .route("/frontend_settings", get(frontend_settings))
        .with_state(state))
}

/// Handle conversation requests.
///
/// Answers with a single JSON envelope, or with one envelope per line
/// (`application/json-lines`) when streaming is configured.
async fn conversation(State(state): State<Arc<ChatState>>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    if !is_json(&headers) {
        return Err(ChatError::UnsupportedMediaType);
    }

    let request: ChatRequest =
        sonic_rs::from_slice(&body).map_err(|e| ChatError::InvalidRequest(format!("Failed to parse request: {e}")))?;

    log::debug!("Conversation request with {} messages", request.messages.len());

    let security_context = state.ms_defender_enabled.then(|| {
        let user = AuthenticatedUser::from_headers(&headers);
        UserSecurityContext::new(&user, &headers, &state.application_name)
    });

    match state.orchestrator.converse(request, security_context).await? {
        Answer::Complete(envelope) => Ok(Json(envelope).into_response()),
        Answer::Stream(envelopes) => {
            let body = Body::from_stream(frame(envelopes).map(Ok::<_, Infallible>));

            Ok(([(header::CONTENT_TYPE, ndjson::CONTENT_TYPE)], body).into_response())
        }
    }
}

async fn frontend_settings(State(state): State<Arc<ChatState>>) -> impl IntoResponse {
    Json(state.frontend_settings.clone())
}

/// `application/json`, or any `+json` media type.
fn is_json(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()) else {
        return false;
    };

    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    mime == "application/json" || mime.ends_with("+json")
}
