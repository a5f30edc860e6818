//! Server → Client frames

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::timestamp::Timestamp;
use crate::tool::{PermissionRequest, PermissionResponse, ToolCallEvent};
use crate::types::*;

/// Frames pushed by the backend on any of the three socket endpoints.
///
/// Envelope is `{type, data, timestamp}`; the envelope timestamp is ignored
/// except on `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    // Session stream
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        data: Message,
    },
    ToolCall {
        data: ToolCallEvent,
    },
    PermissionRequest {
        data: PermissionRequest,
    },
    PermissionResponse {
        data: PermissionResponse,
    },
    StateChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        data: StateChange,
    },
    ResourceRegistered {
        data: Resource,
    },
    ResourceRemoved {
        data: ResourceRemoved,
    },
    QueueUpdate {
        data: QueueUpdate,
    },
    TaskUpdate {
        data: TaskUpdate,
    },
    ScheduleUpdate {
        data: Schedule,
    },
    ScheduleRemoved {
        data: ScheduleRemoved,
    },

    // Global fan-out
    SessionsList {
        data: SessionsList,
    },
    SessionCreated {
        data: SessionInfo,
    },
    SessionUpdated {
        data: SessionInfo,
    },
    SessionDeleted {
        data: SessionDeleted,
    },

    // Legion
    LegionMessage {
        data: LegionMessage,
    },

    // Keepalive
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },

    // Errors
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Frame types this client doesn't know yet
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Message { .. } => "message",
            ServerFrame::ToolCall { .. } => "tool_call",
            ServerFrame::PermissionRequest { .. } => "permission_request",
            ServerFrame::PermissionResponse { .. } => "permission_response",
            ServerFrame::StateChange { .. } => "state_change",
            ServerFrame::ResourceRegistered { .. } => "resource_registered",
            ServerFrame::ResourceRemoved { .. } => "resource_removed",
            ServerFrame::QueueUpdate { .. } => "queue_update",
            ServerFrame::TaskUpdate { .. } => "task_update",
            ServerFrame::ScheduleUpdate { .. } => "schedule_update",
            ServerFrame::ScheduleRemoved { .. } => "schedule_removed",
            ServerFrame::SessionsList { .. } => "sessions_list",
            ServerFrame::SessionCreated { .. } => "session_created",
            ServerFrame::SessionUpdated { .. } => "session_updated",
            ServerFrame::SessionDeleted { .. } => "session_deleted",
            ServerFrame::LegionMessage { .. } => "legion_message",
            ServerFrame::Ping { .. } => "ping",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRemoved {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRemoved {
    pub schedule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsList {
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDeleted {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::ServerFrame;
    use crate::types::SessionState;
    use crate::MessageType;

    #[test]
    fn message_frame_with_envelope_timestamp() {
        let json = r#"{
            "type": "message",
            "session_id": "s1",
            "timestamp": 1700000000.5,
            "data": {"message_id": "m1", "type": "user", "content": "hi", "timestamp": 1700000000}
        }"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        match frame {
            ServerFrame::Message { session_id, data } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(data.message_type, MessageType::User);
                assert_eq!(data.millis(), 1_700_000_000_000);
            }
            other => panic!("expected message frame, got {other:?}"),
        }
    }

    #[test]
    fn state_change_frame() {
        let json = r#"{"type": "state_change", "data": {"state": "terminated", "session_id": "s1"}}"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.kind(), "state_change");
        match frame {
            ServerFrame::StateChange { data, .. } => {
                assert_eq!(data.state, SessionState::Terminated);
                assert_eq!(data.session_id.as_deref(), Some("s1"));
            }
            other => panic!("expected state change, got {other:?}"),
        }
    }

    #[test]
    fn ping_and_unknown_frames() {
        let ping: ServerFrame =
            serde_json::from_str(r#"{"type": "ping", "timestamp": "2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert!(matches!(ping, ServerFrame::Ping { timestamp: Some(_) }));

        let unknown: ServerFrame =
            serde_json::from_str(r#"{"type": "project_updated", "data": {"project_id": "p"}}"#)
                .unwrap();
        assert_eq!(unknown, ServerFrame::Unknown);
    }
}
