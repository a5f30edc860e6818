//! Tool lifecycle wire types: content blocks, permission gate, unified
//! `tool_call` events and backend display hints.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::Timestamp;

/// A `tool_use` content block emitted by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// A `tool_result` content block answering a prior `tool_use`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

/// Human decision on a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    #[serde(alias = "allowed", alias = "approve", alias = "approved")]
    Allow,
    #[serde(alias = "denied")]
    Deny,
}

impl PermissionDecision {
    pub fn is_allow(self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }
}

/// The agent asks before running a tool.
///
/// Older backends only send `tool_name` + `input_params`; newer ones also
/// carry `tool_use_id` so no correlation is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input_params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Value>,
}

/// The decision that answered a permission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub request_id: String,
    pub decision: PermissionDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_updates: Vec<Value>,
}

/// Tool lifecycle state in the backend's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendToolState {
    Pending,
    AwaitingPermission,
    PermissionGranted,
    PermissionDenied,
    Executing,
    Completed,
    Failed,
}

/// Permission sub-record of a unified tool event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPermission {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PermissionDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Result sub-record of a unified tool event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

/// Unified lifecycle event: one frame carries the tool's full current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub status: BackendToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<ToolPermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResultPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Backend display hints
// ---------------------------------------------------------------------------

/// Precomputed tool state for one tool use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayToolState {
    pub status: BackendToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_request_id: Option<String>,
}

/// A tool use the backend has given up on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedTool {
    pub tool_use_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Backend-computed `display` block attached to a message.
///
/// `None` means "not supplied"; an empty list or map is an explicit answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_states: Option<HashMap<String, DisplayToolState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_tools: Option<Vec<OrphanedTool>>,
    /// permission request id → tool use id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_links: Option<HashMap<String, String>>,
}

impl DisplayMetadata {
    pub fn is_empty(&self) -> bool {
        self.tool_states.is_none() && self.orphaned_tools.is_none() && self.permission_links.is_none()
    }
}
