//! Client error types

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to callers of the client.
///
/// Transport drops and sync hiccups never show up here; they are handled by
/// the reconnection machinery and reported on the event bus.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Operation superseded by a newer selection")]
    Cancelled,

    #[error("Engine stopped")]
    EngineClosed,

    #[error("Channel {0} is not connected")]
    ChannelNotConnected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Build an API error from a non-2xx status and its raw body.
    pub fn from_response(status: u16, raw_body: &str) -> Self {
        let body: Value =
            serde_json::from_str(raw_body).unwrap_or_else(|_| Value::String(raw_body.to_string()));
        let message = ["detail", "message", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| format!("request failed with status {status}"));
        ClientError::Api {
            status,
            message,
            body,
        }
    }

    /// HTTP status for API errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_detail_field() {
        let err = ClientError::from_response(404, r#"{"detail": "Session not found"}"#);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "API error 404: Session not found");
    }

    #[test]
    fn api_error_keeps_plain_text_body() {
        let err = ClientError::from_response(502, "Bad Gateway");
        match err {
            ClientError::Api { message, body, .. } => {
                assert_eq!(message, "Bad Gateway");
                assert_eq!(body, Value::String("Bad Gateway".to_string()));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn api_error_with_empty_body_uses_status() {
        let err = ClientError::from_response(500, "");
        assert_eq!(err.to_string(), "API error 500: request failed with status 500");
    }
}
