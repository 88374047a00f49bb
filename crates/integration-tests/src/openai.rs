//! A scripted Azure OpenAI deployment.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// What the mock answers to the next completion request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Server-sent events, one per chunk, then `[DONE]`.
    Stream(Vec<Value>),
    /// A single chat completion body.
    Complete(Value),
    /// An error status with a body.
    Error(u16, Value),
}

/// A completion request as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub deployment: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Value,
}

impl RecordedRequest {
    /// The roles of the messages sent to the model, in order.
    pub fn roles(&self) -> Vec<String> {
        self.body["messages"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|message| message["role"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Clone, Default)]
struct MockState {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockAzureOpenAi {
    address: SocketAddr,
    state: MockState,
    shutdown: CancellationToken,
}

impl MockAzureOpenAi {
    /// Starts a deployment answering the given replies in order.
    pub async fn start(replies: impl IntoIterator<Item = Reply>) -> Self {
        let state = MockState {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            ..Default::default()
        };

        let app = Router::new()
            .route("/openai/deployments/{deployment}/chat/completions", post(completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        tokio::spawn({
            let shutdown = shutdown.clone();

            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .unwrap();
            }
        });

        Self {
            address,
            state,
            shutdown,
        }
    }

    /// A deployment that fails every completion request.
    pub async fn unscripted() -> Self {
        Self::start(Vec::new()).await
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.address)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockAzureOpenAi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn completions(
    State(state): State<MockState>,
    Path(deployment): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let request_number = {
        let mut requests = state.requests.lock().unwrap();

        requests.push(RecordedRequest {
            deployment,
            query,
            headers,
            body,
        });

        requests.len()
    };

    let correlation_id = format!("apim-{request_number}");
    let reply = state.replies.lock().unwrap().pop_front();

    match reply {
        Some(Reply::Stream(chunks)) => {
            let mut events: String = chunks.iter().map(|chunk| format!("data: {chunk}\n\n")).collect();
            events.push_str("data: [DONE]\n\n");

            (
                [
                    (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                    ("apim-request-id", correlation_id.as_str()),
                ],
                events,
            )
                .into_response()
        }
        Some(Reply::Complete(completion)) => (
            [
                (header::CONTENT_TYPE.as_str(), "application/json"),
                ("apim-request-id", correlation_id.as_str()),
            ],
            completion.to_string(),
        )
            .into_response(),
        Some(Reply::Error(status, error)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            [(header::CONTENT_TYPE.as_str(), "application/json")],
            error.to_string(),
        )
            .into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": { "message": "no scripted reply left" } }).to_string(),
        )
            .into_response(),
    }
}

fn chunk(delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1718000000,
        "model": "gpt-4o",
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
    })
}

/// A chunk carrying answer text.
pub fn text_chunk(content: &str) -> Value {
    chunk(json!({ "content": content }), None)
}

/// The chunk that opens a tool call.
pub fn tool_call_chunk(index: u32, id: &str, name: &str, arguments: &str) -> Value {
    chunk(
        json!({
            "role": "assistant",
            "tool_calls": [{
                "index": index,
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            }]
        }),
        None,
    )
}

/// A chunk continuing the arguments of an open tool call.
pub fn arguments_chunk(index: u32, arguments: &str) -> Value {
    chunk(
        json!({ "tool_calls": [{ "index": index, "function": { "arguments": arguments } }] }),
        None,
    )
}

/// The last chunk of a completion.
pub fn finish_chunk(reason: &str) -> Value {
    chunk(json!({}), Some(reason))
}

/// A whole completion answering with text.
pub fn text_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1718000000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

/// A whole completion asking for one function call.
pub fn tool_call_completion(id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1718000000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}
