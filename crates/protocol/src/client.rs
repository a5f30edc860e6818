//! Client → Server frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::Timestamp;
use crate::tool::PermissionDecision;

/// Frames sent from client to server on a session socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
    },
    PermissionResponse {
        request_id: String,
        decision: PermissionDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clarification: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        selected_suggestions: Vec<Value>,
    },
    InterruptSession,
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },
}

impl ClientFrame {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::PermissionResponse { .. } => "permission_response",
            ClientFrame::InterruptSession => "interrupt_session",
            ClientFrame::Pong { .. } => "pong",
        }
    }
}
