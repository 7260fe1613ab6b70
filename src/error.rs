use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures that can surface while relaying a message.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        error!(event = "request_failed", error = %self, "Request failed");

        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
