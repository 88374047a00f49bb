use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Errors of the completion pipeline, each mapped to an HTTP status.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request body is not JSON.
    #[error("request must be json")]
    UnsupportedMediaType,

    /// The request body could not be understood.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The completion provider answered with a non-success status.
    #[error("{message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error towards the provider.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The model produced function arguments that are not valid JSON.
    #[error("Malformed arguments for function '{name}': {reason}")]
    MalformedToolArguments { name: String, reason: String },

    /// The remote function endpoint failed.
    #[error("Function '{name}' failed: {reason}")]
    FunctionCallFailed { name: String, reason: String },

    /// Fragments of two tool calls arrived interleaved.
    #[error("Interleaved tool call fragments are not supported (pending call {pending}, fragment for call {received})")]
    InterleavedToolCalls { pending: u32, received: u32 },

    /// The model kept requesting functions.
    #[error("Gave up after {0} rounds of function calls")]
    FunctionRoundsExceeded(usize),

    /// Internal server error.
    /// If Some(message), it came from the provider and can be shown.
    /// If None, it is our own failure and should not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl ChatError {
    /// The status forwarded to the client: the provider's own status when there is one, 500 otherwise.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ProviderApiError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::ConnectionError(_)
            | Self::MalformedToolArguments { .. }
            | Self::FunctionCallFailed { .. }
            | Self::InterleavedToolCalls { .. }
            | Self::FunctionRoundsExceeded(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(message)) => message.clone(),
            _ => self.to_string(),
        }
    }
}

/// The error document sent to the client, both as a response body and as the last line of a stream.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorDocument {
    pub error: String,
}

impl From<&ChatError> for ErrorDocument {
    fn from(error: &ChatError) -> Self {
        Self {
            error: error.client_message(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            log::error!("Chat request failed: {self}");
        } else {
            log::debug!("Chat request rejected: {self}");
        }

        (status, Json(ErrorDocument::from(&self))).into_response()
    }
}
