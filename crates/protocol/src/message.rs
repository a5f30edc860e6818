//! Session message log entries

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timestamp::Timestamp;
use crate::tool::{
    DisplayMetadata, PermissionRequest, PermissionResponse, ToolCallEvent, ToolResultBlock,
    ToolUseBlock,
};

/// Message type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    PermissionRequest,
    PermissionResponse,
    ToolCall,
    #[serde(other)]
    Unknown,
}

/// One block of SDK message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    #[serde(other)]
    Other,
}

/// Per-message metadata. Which fields are populated depends on `MessageType`;
/// use [`Message::payload`] for a typed view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_request: Option<PermissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_response: Option<PermissionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A message in a session's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "id")]
    pub message_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Typed view over a message's metadata, keyed by `MessageType`
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload<'a> {
    User {
        tool_results: Vec<&'a ToolResultBlock>,
    },
    Assistant {
        tool_uses: Vec<&'a ToolUseBlock>,
    },
    System {
        subtype: Option<&'a str>,
        init_data: Option<&'a Value>,
    },
    PermissionRequest(&'a PermissionRequest),
    PermissionResponse(&'a PermissionResponse),
    ToolCall(&'a ToolCallEvent),
    Unknown,
}

impl Message {
    /// Normalized timestamp in unix milliseconds
    pub fn millis(&self) -> i64 {
        self.timestamp.millis_or_zero()
    }

    /// Typed payload for this message's type.
    ///
    /// Returns `None` when the metadata doesn't carry what the type promises
    /// (e.g. a `permission_request` message without a request record).
    pub fn payload(&self) -> Option<MessagePayload<'_>> {
        let meta = &self.metadata;
        let payload = match self.message_type {
            MessageType::User => MessagePayload::User {
                tool_results: meta.tool_results().collect(),
            },
            MessageType::Assistant => MessagePayload::Assistant {
                tool_uses: meta.tool_uses().collect(),
            },
            MessageType::System => MessagePayload::System {
                subtype: meta.subtype.as_deref(),
                init_data: meta.init_data.as_ref(),
            },
            MessageType::PermissionRequest => {
                MessagePayload::PermissionRequest(meta.permission_request.as_ref()?)
            }
            MessageType::PermissionResponse => {
                MessagePayload::PermissionResponse(meta.permission_response.as_ref()?)
            }
            MessageType::ToolCall => MessagePayload::ToolCall(meta.tool_call.as_ref()?),
            MessageType::Unknown => MessagePayload::Unknown,
        };
        Some(payload)
    }

    /// Init payload of a `system` / `init` message
    pub fn init_data(&self) -> Option<&Value> {
        match self.payload()? {
            MessagePayload::System {
                subtype: Some("init"),
                init_data,
            } => init_data,
            _ => None,
        }
    }
}

impl MessageMetadata {
    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content_blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultBlock> {
        self.content_blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_message_exposes_tool_uses() {
        let json = r#"{
            "message_id": "m1",
            "session_id": "s1",
            "type": "assistant",
            "content": "Listing files",
            "timestamp": "2024-01-01T00:00:00Z",
            "metadata": {
                "content_blocks": [
                    {"type": "text", "text": "Listing files"},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "server_tool_use", "id": "x"}
                ],
                "model": "claude"
            }
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.metadata.content_blocks.len(), 3);
        assert_eq!(message.metadata.extra.get("model"), Some(&Value::from("claude")));

        match message.payload() {
            Some(MessagePayload::Assistant { tool_uses }) => {
                assert_eq!(tool_uses.len(), 1);
                assert_eq!(tool_uses[0].id, "t1");
            }
            other => panic!("expected assistant payload, got {other:?}"),
        }
    }

    #[test]
    fn permission_request_without_record_is_malformed() {
        let json = r#"{"id": "m2", "type": "permission_request", "timestamp": 1700000000}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.message_id, "m2");
        assert!(message.payload().is_none());
    }

    #[test]
    fn init_data_only_for_init_subtype() {
        let init: Message = serde_json::from_str(
            r#"{"id": "m3", "type": "system", "metadata": {"subtype": "init", "init_data": {"model": "opus"}}}"#,
        )
        .unwrap();
        let other: Message = serde_json::from_str(
            r#"{"id": "m4", "type": "system", "metadata": {"subtype": "compact", "init_data": {"model": "opus"}}}"#,
        )
        .unwrap();
        assert_eq!(init.init_data().and_then(|d| d.get("model")), Some(&Value::from("opus")));
        assert!(other.init_data().is_none());
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let message: Message =
            serde_json::from_str(r#"{"id": "m5", "type": "result", "timestamp": 5}"#).unwrap();
        assert_eq!(message.message_type, MessageType::Unknown);
        assert_eq!(message.payload(), Some(MessagePayload::Unknown));
        assert_eq!(message.millis(), 5000);
    }
}
