//! A function host serving a tool list and executing tool calls.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A tool execution as the host received it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub tool_arguments: Value,
}

#[derive(Clone, Default)]
struct HostState {
    tools: Vec<Value>,
    answers: HashMap<String, String>,
    invocations: Arc<Mutex<Vec<ToolInvocation>>>,
    access_codes: Arc<Mutex<Vec<Option<String>>>>,
}

#[derive(Default)]
pub struct MockFunctionHost {
    state: HostState,
    address: Option<SocketAddr>,
    shutdown: CancellationToken,
}

impl MockFunctionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool to the list and the text its execution returns.
    pub fn with_tool(mut self, name: &str, answer: &str) -> Self {
        self.state.tools.push(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": format!("The {name} tool"),
                "parameters": { "type": "object", "properties": {} }
            }
        }));

        self.state.answers.insert(name.to_string(), answer.to_string());
        self
    }

    /// Adds a tool to the list whose execution fails.
    pub fn with_failing_tool(mut self, name: &str) -> Self {
        self.state.tools.push(json!({ "type": "function", "function": { "name": name } }));
        self
    }

    pub async fn start(mut self) -> Self {
        let app = Router::new()
            .route("/api/tools", get(list_tools))
            .route("/api/tool", post(execute_tool))
            .with_state(self.state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        self.address = Some(listener.local_addr().unwrap());

        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .unwrap();
        });

        self
    }

    pub fn base_url(&self) -> String {
        let address = self.address.map(|address| address.to_string()).unwrap_or_default();
        format!("http://{address}")
    }

    /// Tool executions received so far.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.state.invocations.lock().unwrap().clone()
    }

    /// The `code` query parameter of every request, in order.
    pub fn access_codes(&self) -> Vec<Option<String>> {
        self.state.access_codes.lock().unwrap().clone()
    }
}

impl Drop for MockFunctionHost {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn list_tools(State(state): State<HostState>, Query(query): Query<HashMap<String, String>>) -> Json<Vec<Value>> {
    state.access_codes.lock().unwrap().push(query.get("code").cloned());

    Json(state.tools.clone())
}

async fn execute_tool(
    State(state): State<HostState>,
    Query(query): Query<HashMap<String, String>>,
    Json(invocation): Json<ToolInvocation>,
) -> Response {
    state.access_codes.lock().unwrap().push(query.get("code").cloned());

    let answer = state.answers.get(&invocation.tool_name).cloned();
    state.invocations.lock().unwrap().push(invocation);

    match answer {
        Some(answer) => answer.into_response(),
        None => (StatusCode::NOT_FOUND, "unknown tool").into_response(),
    }
}
