//! Per-session tool-call table
//!
//! One `ToolCall` per tool-use id, created on first sight and updated in
//! place after that. Every handler only assigns fields, so replaying the
//! same event (history reload, reconnect sync, duplicate frame) is a no-op
//! and the legacy four-step flow can interleave with unified `tool_call`
//! events without double-applying anything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use legion_protocol::{
    BackendToolState, DisplayMetadata, PermissionDecision, PermissionRequest, PermissionResponse,
    ToolCallEvent, ToolResultBlock, ToolUseBlock,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::signature::tool_signature;

/// Local tool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    PermissionRequired,
    Executing,
    Completed,
    Error,
}

impl ToolStatus {
    /// Backend vocabulary → local status. Denial is terminal `completed`.
    pub fn from_backend(state: BackendToolState) -> Self {
        match state {
            BackendToolState::Pending => ToolStatus::Pending,
            BackendToolState::AwaitingPermission => ToolStatus::PermissionRequired,
            BackendToolState::PermissionGranted => ToolStatus::Executing,
            BackendToolState::PermissionDenied => ToolStatus::Completed,
            BackendToolState::Executing => ToolStatus::Executing,
            BackendToolState::Completed => ToolStatus::Completed,
            BackendToolState::Failed => ToolStatus::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::PermissionRequired => "permission_required",
            ToolStatus::Executing => "executing",
            ToolStatus::Completed => "completed",
            ToolStatus::Error => "error",
        }
    }
}

/// Result attached to a finished tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

/// Why a tool use will never get its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanInfo {
    pub reason: String,
    pub message: String,
}

const DEFAULT_ORPHAN_MESSAGE: &str = "The tool did not report a result before the session stopped";

/// One tool invocation as the UI sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub input: Value,
    pub status: ToolStatus,
    pub permission_request_id: Option<String>,
    pub permission_decision: Option<PermissionDecision>,
    pub suggestions: Vec<Value>,
    pub result: Option<ToolResult>,
    pub expanded: bool,
    pub orphaned: bool,
    pub orphan_reason: Option<String>,
    /// Creation order within the session
    pub seq: u64,
}

impl ToolCall {
    fn new(session_id: &str, tool_use_id: &str, tool_name: &str, input: Value, seq: u64) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
            status: ToolStatus::Pending,
            permission_request_id: None,
            permission_decision: None,
            suggestions: Vec::new(),
            result: None,
            expanded: true,
            orphaned: false,
            orphan_reason: None,
            seq,
        }
    }

    /// Status to render: orphaned tools show as completed, result untouched.
    pub fn effective_status(&self) -> ToolStatus {
        if self.orphaned {
            ToolStatus::Completed
        } else {
            self.status
        }
    }

    /// Orphan reason to render next to an orphaned tool
    pub fn caveat(&self) -> Option<&str> {
        if self.orphaned {
            self.orphan_reason.as_deref()
        } else {
            None
        }
    }

    pub fn signature(&self) -> String {
        tool_signature(&self.tool_name, &self.input)
    }
}

pub type ToolCallTable = HashMap<String, ToolCall>;

#[derive(Debug, Clone, Default)]
pub struct ToolTracker {
    session_id: String,
    calls: Arc<ToolCallTable>,
    /// signature → tool use ids in creation order
    signatures: HashMap<String, Vec<String>>,
    /// permission request id → tool use id
    permission_links: HashMap<String, String>,
    orphans: HashMap<String, OrphanInfo>,
    /// Tool uses with no terminal result yet
    open: HashSet<String>,
    next_seq: u64,
}

impl ToolTracker {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Snapshot of the table (cheap clone)
    pub fn calls(&self) -> Arc<ToolCallTable> {
        Arc::clone(&self.calls)
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolCall> {
        self.calls.get(tool_use_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn open_tools(&self) -> impl Iterator<Item = &String> {
        self.open.iter()
    }

    /// Rebuild the open set from the table: every unfinished, unorphaned call.
    pub fn recompute_open(&mut self) {
        self.open = self
            .calls
            .values()
            .filter(|call| {
                !call.status.is_terminal() && !self.orphans.contains_key(&call.tool_use_id)
            })
            .map(|call| call.tool_use_id.clone())
            .collect();
    }

    pub fn resolve_request(&self, request_id: &str) -> Option<&str> {
        self.permission_links.get(request_id).map(String::as_str)
    }

    fn call_mut(&mut self, tool_use_id: &str) -> Option<&mut ToolCall> {
        Arc::make_mut(&mut self.calls).get_mut(tool_use_id)
    }

    fn ensure_call(&mut self, tool_use_id: &str, tool_name: &str, input: Value) -> &mut ToolCall {
        let seq = self.next_seq;
        if !self.calls.contains_key(tool_use_id) {
            self.next_seq += 1;
            self.index_signature(tool_use_id, &tool_signature(tool_name, &input));
            self.open.insert(tool_use_id.to_string());
        }
        let session_id = &self.session_id;
        Arc::make_mut(&mut self.calls)
            .entry(tool_use_id.to_string())
            .or_insert_with(|| ToolCall::new(session_id, tool_use_id, tool_name, input, seq))
    }

    fn index_signature(&mut self, tool_use_id: &str, signature: &str) {
        let ids = self.signatures.entry(signature.to_string()).or_default();
        if !ids.iter().any(|id| id == tool_use_id) {
            ids.push(tool_use_id.to_string());
        }
    }

    fn unindex_signature(&mut self, tool_use_id: &str, signature: &str) {
        if let Some(ids) = self.signatures.get_mut(signature) {
            ids.retain(|id| id != tool_use_id);
            if ids.is_empty() {
                self.signatures.remove(signature);
            }
        }
    }

    /// Newest not-yet-finished tool use matching a signature
    fn find_by_signature(&self, signature: &str) -> Option<String> {
        let ids = self.signatures.get(signature)?;
        ids.iter()
            .rev()
            .find(|id| {
                self.calls
                    .get(id.as_str())
                    .is_some_and(|call| !call.status.is_terminal())
            })
            .or_else(|| ids.last())
            .cloned()
    }

    fn mark_closed(&mut self, tool_use_id: &str) {
        self.open.remove(tool_use_id);
    }

    // -----------------------------------------------------------------------
    // Legacy four-step flow
    // -----------------------------------------------------------------------

    /// First sight creates a `pending` call; later sights only refresh name/input.
    pub fn handle_tool_use(&mut self, block: &ToolUseBlock) {
        if let Some(existing) = self.calls.get(&block.id) {
            let old_signature = existing.signature();
            let new_signature = tool_signature(&block.name, &block.input);
            if old_signature == new_signature {
                return;
            }
            self.unindex_signature(&block.id, &old_signature);
            self.index_signature(&block.id, &new_signature);
            if let Some(call) = self.call_mut(&block.id) {
                call.tool_name = block.name.clone();
                call.input = block.input.clone();
            }
            return;
        }

        self.ensure_call(&block.id, &block.name, block.input.clone());
        debug!(
            component = "tool_tracker",
            event = "tool.created",
            session_id = %self.session_id,
            tool_use_id = %block.id,
            tool_name = %block.name,
            "Tool use observed"
        );
    }

    /// Returns the tool use id the request was attached to.
    pub fn handle_permission_request(&mut self, request: &PermissionRequest) -> Option<String> {
        let tool_use_id = request
            .tool_use_id
            .clone()
            .or_else(|| self.permission_links.get(&request.request_id).cloned())
            .or_else(|| {
                self.find_by_signature(&tool_signature(&request.tool_name, &request.input_params))
            });

        let Some(tool_use_id) = tool_use_id else {
            debug!(
                component = "tool_tracker",
                event = "permission.uncorrelated",
                session_id = %self.session_id,
                request_id = %request.request_id,
                tool_name = %request.tool_name,
                "Permission request matches no known tool use"
            );
            return None;
        };

        self.permission_links
            .insert(request.request_id.clone(), tool_use_id.clone());

        let call = self.ensure_call(
            &tool_use_id,
            &request.tool_name,
            request.input_params.clone(),
        );
        call.permission_request_id = Some(request.request_id.clone());
        if !request.suggestions.is_empty() {
            call.suggestions = request.suggestions.clone();
        }
        // A redelivered request must not pull a finished tool backwards.
        if matches!(
            call.status,
            ToolStatus::Pending | ToolStatus::PermissionRequired
        ) {
            call.status = ToolStatus::PermissionRequired;
            call.expanded = true;
        }
        Some(tool_use_id)
    }

    pub fn handle_permission_response(&mut self, response: &PermissionResponse) -> Option<String> {
        let tool_use_id = response
            .tool_use_id
            .clone()
            .or_else(|| self.permission_links.get(&response.request_id).cloned());

        let Some(tool_use_id) = tool_use_id else {
            debug!(
                component = "tool_tracker",
                event = "permission.response_uncorrelated",
                session_id = %self.session_id,
                request_id = %response.request_id,
                "Permission response for unknown request"
            );
            return None;
        };
        self.permission_links
            .insert(response.request_id.clone(), tool_use_id.clone());

        let call = self.call_mut(&tool_use_id)?;
        call.permission_request_id = Some(response.request_id.clone());
        call.permission_decision = Some(response.decision);
        if call.status.is_terminal() {
            return Some(tool_use_id);
        }

        match response.decision {
            PermissionDecision::Allow => {
                call.status = ToolStatus::Executing;
            }
            PermissionDecision::Deny => {
                call.status = ToolStatus::Completed;
                call.result = Some(denial_result(response.reasoning.as_deref()));
                call.expanded = false;
                self.mark_closed(&tool_use_id);
            }
        }
        Some(tool_use_id)
    }

    pub fn handle_tool_result(&mut self, block: &ToolResultBlock) {
        let call = self.ensure_call(&block.tool_use_id, "", Value::Null);
        call.status = if block.is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Completed
        };
        call.result = Some(ToolResult {
            content: block.content.clone(),
            is_error: block.is_error,
        });
        call.expanded = false;
        // A real result beats any earlier orphan verdict.
        call.orphaned = false;
        call.orphan_reason = None;
        self.orphans.remove(&block.tool_use_id);
        self.mark_closed(&block.tool_use_id);
    }

    // -----------------------------------------------------------------------
    // Unified tool_call events
    // -----------------------------------------------------------------------

    /// Applies the event's full state; every present field is last-write-wins.
    pub fn handle_tool_call(&mut self, event: &ToolCallEvent) {
        let existing_signature = self.calls.get(&event.tool_use_id).map(ToolCall::signature);
        let status = ToolStatus::from_backend(event.status);

        let call = self.ensure_call(&event.tool_use_id, &event.tool_name, event.input.clone());
        call.tool_name = event.tool_name.clone();
        if !event.input.is_null() {
            call.input = event.input.clone();
        }
        call.status = status;

        if let Some(permission) = &event.permission {
            call.permission_request_id = Some(permission.request_id.clone());
            if permission.decision.is_some() {
                call.permission_decision = permission.decision;
            }
            if !permission.suggestions.is_empty() {
                call.suggestions = permission.suggestions.clone();
            }
        }

        let has_result = event.result.is_some();
        if let Some(result) = &event.result {
            call.result = Some(ToolResult {
                content: result.content.clone(),
                is_error: result.is_error,
            });
            call.orphaned = false;
            call.orphan_reason = None;
        } else if event.status == BackendToolState::PermissionDenied && call.result.is_none() {
            let reasoning = event
                .permission
                .as_ref()
                .and_then(|p| p.reasoning.as_deref());
            call.result = Some(denial_result(reasoning));
        }

        if event.status == BackendToolState::PermissionDenied {
            call.permission_decision = Some(PermissionDecision::Deny);
        }

        call.expanded = !status.is_terminal();
        let new_signature = call.signature();

        if let Some(permission) = &event.permission {
            self.permission_links
                .insert(permission.request_id.clone(), event.tool_use_id.clone());
        }
        if has_result {
            self.orphans.remove(&event.tool_use_id);
        }
        if let Some(old) = existing_signature {
            if old != new_signature {
                self.unindex_signature(&event.tool_use_id, &old);
                self.index_signature(&event.tool_use_id, &new_signature);
            }
        }
        if status.is_terminal() {
            self.mark_closed(&event.tool_use_id);
        } else {
            self.open.insert(event.tool_use_id.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Backend display hints
    // -----------------------------------------------------------------------

    /// Permission links go in before local correlation runs.
    pub fn apply_display_links(&mut self, display: &DisplayMetadata) {
        if let Some(links) = &display.permission_links {
            for (request_id, tool_use_id) in links {
                self.permission_links
                    .insert(request_id.clone(), tool_use_id.clone());
            }
        }
    }

    /// Tool states and the orphan list go in after local inference so the
    /// backend's answer is the one that sticks.
    pub fn apply_display_states(&mut self, display: &DisplayMetadata) {
        if let Some(states) = &display.tool_states {
            for (tool_use_id, state) in states {
                let status = ToolStatus::from_backend(state.status);
                let name = state.tool_name.as_deref().unwrap_or_default();
                let call = self.ensure_call(tool_use_id, name, Value::Null);
                if call.tool_name.is_empty() {
                    if let Some(name) = &state.tool_name {
                        call.tool_name = name.clone();
                    }
                }
                call.status = status;
                if let Some(request_id) = &state.permission_request_id {
                    call.permission_request_id = Some(request_id.clone());
                }
                if status.is_terminal() {
                    call.expanded = false;
                    self.mark_closed(tool_use_id);
                } else {
                    self.open.insert(tool_use_id.clone());
                }
                if let Some(request_id) = &state.permission_request_id {
                    self.permission_links
                        .insert(request_id.clone(), tool_use_id.clone());
                }
            }
        }

        if let Some(orphaned) = &display.orphaned_tools {
            self.replace_orphans(orphaned.iter().map(|tool| {
                (
                    tool.tool_use_id.clone(),
                    OrphanInfo {
                        reason: tool.reason.clone(),
                        message: tool
                            .message
                            .clone()
                            .unwrap_or_else(|| DEFAULT_ORPHAN_MESSAGE.to_string()),
                    },
                )
            }));
        }
    }

    // -----------------------------------------------------------------------
    // Orphans
    // -----------------------------------------------------------------------

    pub fn mark_orphaned(&mut self, tool_use_id: &str, reason: &str, message: Option<&str>) {
        let info = OrphanInfo {
            reason: reason.to_string(),
            message: message.unwrap_or(DEFAULT_ORPHAN_MESSAGE).to_string(),
        };
        if let Some(call) = self.call_mut(tool_use_id) {
            call.orphaned = true;
            call.orphan_reason = Some(info.reason.clone());
            call.expanded = false;
        }
        self.orphans.insert(tool_use_id.to_string(), info);
        self.mark_closed(tool_use_id);
    }

    /// Orphan every open tool use; returns the ids that were marked.
    pub fn orphan_open_tools(&mut self, reason: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .open
            .iter()
            .filter(|id| !self.orphans.contains_key(id.as_str()))
            .cloned()
            .collect();
        ids.sort();
        for id in &ids {
            self.mark_orphaned(id, reason, None);
        }
        ids
    }

    /// The backend's list replaces local orphan tracking wholesale.
    fn replace_orphans(&mut self, entries: impl Iterator<Item = (String, OrphanInfo)>) {
        let previous: Vec<String> = self.orphans.keys().cloned().collect();
        self.orphans.clear();
        for id in previous {
            if let Some(call) = self.call_mut(&id) {
                call.orphaned = false;
                call.orphan_reason = None;
            }
        }
        for (id, info) in entries {
            if let Some(call) = self.call_mut(&id) {
                call.orphaned = true;
                call.orphan_reason = Some(info.reason.clone());
                call.expanded = false;
            }
            self.open.remove(&id);
            self.orphans.insert(id, info);
        }
    }

    pub fn is_orphaned(&self, tool_use_id: &str) -> bool {
        self.orphans.contains_key(tool_use_id)
    }

    pub fn orphan_info(&self, tool_use_id: &str) -> Option<&OrphanInfo> {
        self.orphans.get(tool_use_id)
    }

    /// Flip a card's expansion; returns the new value.
    pub fn toggle_expanded(&mut self, tool_use_id: &str) -> Option<bool> {
        let call = self.call_mut(tool_use_id)?;
        call.expanded = !call.expanded;
        Some(call.expanded)
    }
}

fn denial_result(reasoning: Option<&str>) -> ToolResult {
    let text = match reasoning {
        Some(reason) if !reason.trim().is_empty() => format!("Permission denied: {reason}"),
        _ => "Permission denied".to_string(),
    };
    ToolResult {
        content: Value::String(text),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_protocol::{DisplayToolState, OrphanedTool, ToolPermission, ToolResultPayload};
    use serde_json::json;

    fn tool_use(id: &str, name: &str, input: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn request(request_id: &str, name: &str, input: Value) -> PermissionRequest {
        PermissionRequest {
            request_id: request_id.to_string(),
            tool_name: name.to_string(),
            input_params: input,
            tool_use_id: None,
            suggestions: vec![],
        }
    }

    fn response(request_id: &str, decision: PermissionDecision) -> PermissionResponse {
        PermissionResponse {
            request_id: request_id.to_string(),
            decision,
            reasoning: None,
            tool_use_id: None,
            clarification: None,
            applied_updates: vec![],
        }
    }

    fn unified(id: &str, status: BackendToolState) -> ToolCallEvent {
        ToolCallEvent {
            tool_use_id: id.to_string(),
            session_id: None,
            tool_name: "Bash".to_string(),
            input: json!({"command": "ls"}),
            status,
            permission: None,
            result: None,
            timestamp: None,
        }
    }

    #[test]
    fn backend_state_table() {
        use BackendToolState::*;
        assert_eq!(ToolStatus::from_backend(Pending), ToolStatus::Pending);
        assert_eq!(
            ToolStatus::from_backend(AwaitingPermission),
            ToolStatus::PermissionRequired
        );
        assert_eq!(ToolStatus::from_backend(PermissionGranted), ToolStatus::Executing);
        assert_eq!(ToolStatus::from_backend(PermissionDenied), ToolStatus::Completed);
        assert_eq!(ToolStatus::from_backend(Executing), ToolStatus::Executing);
        assert_eq!(ToolStatus::from_backend(Completed), ToolStatus::Completed);
        assert_eq!(ToolStatus::from_backend(Failed), ToolStatus::Error);
    }

    #[test]
    fn permission_request_correlates_by_signature() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        let resolved =
            tracker.handle_permission_request(&request("r1", "Bash", json!({"command": "ls"})));

        assert_eq!(resolved.as_deref(), Some("t1"));
        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::PermissionRequired);
        assert_eq!(call.permission_request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn signature_prefers_newest_unfinished_tool() {
        let mut tracker = ToolTracker::new("s");
        let input = json!({"command": "cargo fmt"});
        tracker.handle_tool_use(&tool_use("t1", "Bash", input.clone()));
        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t1".to_string(),
            content: json!("ok"),
            is_error: false,
        });
        tracker.handle_tool_use(&tool_use("t2", "Bash", input.clone()));

        let resolved = tracker.handle_permission_request(&request("r2", "Bash", input));
        assert_eq!(resolved.as_deref(), Some("t2"));
        assert_eq!(tracker.get("t1").unwrap().status, ToolStatus::Completed);
    }

    #[test]
    fn explicit_tool_use_id_skips_signature_lookup() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        tracker.handle_tool_use(&tool_use("t2", "Bash", json!({"command": "ls"})));

        let mut req = request("r1", "Bash", json!({"command": "ls"}));
        req.tool_use_id = Some("t1".to_string());
        assert_eq!(tracker.handle_permission_request(&req).as_deref(), Some("t1"));
        assert_eq!(tracker.get("t2").unwrap().status, ToolStatus::Pending);
    }

    #[test]
    fn allow_then_result_completes_and_collapses() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        tracker.handle_permission_request(&request("r1", "Bash", json!({"command": "ls"})));
        tracker.handle_permission_response(&response("r1", PermissionDecision::Allow));
        assert_eq!(tracker.get("t1").unwrap().status, ToolStatus::Executing);

        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t1".to_string(),
            content: json!("Cargo.toml\nsrc"),
            is_error: false,
        });
        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::Completed);
        assert!(!call.expanded);
        assert_eq!(tracker.open_tools().count(), 0);
    }

    #[test]
    fn deny_is_terminal_with_synthetic_result() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "rm -rf /"})));
        tracker.handle_permission_request(&request("r1", "Bash", json!({"command": "rm -rf /"})));
        let mut deny = response("r1", PermissionDecision::Deny);
        deny.reasoning = Some("too dangerous".to_string());
        tracker.handle_permission_response(&deny);

        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::Completed);
        assert_eq!(call.permission_decision, Some(PermissionDecision::Deny));
        assert!(!call.expanded);
        let result = call.result.as_ref().unwrap();
        assert_eq!(result.content, json!("Permission denied: too dangerous"));
    }

    #[test]
    fn redelivered_request_does_not_reopen_finished_tool() {
        let mut tracker = ToolTracker::new("s");
        let input = json!({"command": "ls"});
        tracker.handle_tool_use(&tool_use("t1", "Bash", input.clone()));
        tracker.handle_permission_request(&request("r1", "Bash", input.clone()));
        tracker.handle_permission_response(&response("r1", PermissionDecision::Allow));
        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t1".to_string(),
            content: json!("done"),
            is_error: false,
        });

        tracker.handle_permission_request(&request("r1", "Bash", input));
        assert_eq!(tracker.get("t1").unwrap().status, ToolStatus::Completed);
    }

    #[test]
    fn mixed_protocols_keep_one_record_last_write_wins() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        tracker.handle_tool_call(&unified("t1", BackendToolState::Executing));
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        let mut done = unified("t1", BackendToolState::Completed);
        done.result = Some(ToolResultPayload {
            content: json!("ok"),
            is_error: false,
        });
        tracker.handle_tool_call(&done);

        assert_eq!(tracker.len(), 1);
        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::Completed);
        assert_eq!(call.result.as_ref().unwrap().content, json!("ok"));
        assert_eq!(call.seq, 0);
    }

    #[test]
    fn unified_denial_gets_denial_result() {
        let mut tracker = ToolTracker::new("s");
        let mut event = unified("t1", BackendToolState::PermissionDenied);
        event.permission = Some(ToolPermission {
            request_id: "r1".to_string(),
            decision: None,
            suggestions: vec![],
            reasoning: None,
        });
        tracker.handle_tool_call(&event);

        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::Completed);
        assert_eq!(call.permission_decision, Some(PermissionDecision::Deny));
        assert_eq!(call.result.as_ref().unwrap().content, json!("Permission denied"));
        assert_eq!(tracker.resolve_request("r1"), Some("t1"));
    }

    #[test]
    fn orphan_open_tools_marks_every_unfinished_use() {
        let mut tracker = ToolTracker::new("s");
        for id in ["t1", "t2", "t3"] {
            tracker.handle_tool_use(&tool_use(id, "Read", json!({"path": id})));
        }
        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t2".to_string(),
            content: json!("contents"),
            is_error: false,
        });

        let marked = tracker.orphan_open_tools("session was terminated");
        assert_eq!(marked, vec!["t1".to_string(), "t3".to_string()]);
        let call = tracker.get("t1").unwrap();
        assert!(call.orphaned);
        assert_eq!(call.status, ToolStatus::Pending);
        assert_eq!(call.effective_status(), ToolStatus::Completed);
        assert_eq!(call.caveat(), Some("session was terminated"));
        assert!(call.result.is_none());
        assert!(!tracker.is_orphaned("t2"));
    }

    #[test]
    fn display_orphan_list_replaces_local_tracking() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Read", json!({})));
        tracker.handle_tool_use(&tool_use("t2", "Read", json!({"x": 1})));
        tracker.mark_orphaned("t1", "session was interrupted", None);

        let display = DisplayMetadata {
            tool_states: None,
            orphaned_tools: Some(vec![OrphanedTool {
                tool_use_id: "t2".to_string(),
                reason: "session restarted".to_string(),
                message: Some("Restarted mid-tool".to_string()),
            }]),
            permission_links: None,
        };
        tracker.apply_display_states(&display);

        assert!(!tracker.is_orphaned("t1"));
        assert!(!tracker.get("t1").unwrap().orphaned);
        assert!(tracker.is_orphaned("t2"));
        assert_eq!(
            tracker.orphan_info("t2").unwrap().message,
            "Restarted mid-tool"
        );
    }

    #[test]
    fn display_states_override_local_status() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));

        let mut states = HashMap::new();
        states.insert(
            "t1".to_string(),
            DisplayToolState {
                status: BackendToolState::Failed,
                tool_name: None,
                permission_request_id: Some("r9".to_string()),
            },
        );
        tracker.apply_display_states(&DisplayMetadata {
            tool_states: Some(states),
            orphaned_tools: None,
            permission_links: None,
        });

        let call = tracker.get("t1").unwrap();
        assert_eq!(call.status, ToolStatus::Error);
        assert_eq!(call.permission_request_id.as_deref(), Some("r9"));
        assert_eq!(tracker.resolve_request("r9"), Some("t1"));
        assert_eq!(tracker.open_tools().count(), 0);
    }

    #[test]
    fn result_after_orphan_clears_orphan() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({})));
        tracker.orphan_open_tools("session was terminated");
        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t1".to_string(),
            content: json!("late"),
            is_error: true,
        });
        let call = tracker.get("t1").unwrap();
        assert!(!call.orphaned);
        assert_eq!(call.effective_status(), ToolStatus::Error);
    }

    #[test]
    fn unified_result_after_orphan_clears_orphan() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({"command": "ls"})));
        tracker.orphan_open_tools("session was terminated");
        assert!(tracker.is_orphaned("t1"));

        let mut done = unified("t1", BackendToolState::Completed);
        done.result = Some(ToolResultPayload {
            content: json!("late"),
            is_error: false,
        });
        tracker.handle_tool_call(&done);

        let call = tracker.get("t1").unwrap();
        assert!(!call.orphaned);
        assert!(call.caveat().is_none());
        assert!(!tracker.is_orphaned("t1"));
        assert_eq!(call.effective_status(), ToolStatus::Completed);
    }

    #[test]
    fn recompute_open_skips_finished_and_orphaned() {
        let mut tracker = ToolTracker::new("s");
        for id in ["t1", "t2", "t3"] {
            tracker.handle_tool_use(&tool_use(id, "Read", json!({"path": id})));
        }
        tracker.handle_tool_result(&ToolResultBlock {
            tool_use_id: "t2".to_string(),
            content: json!("contents"),
            is_error: false,
        });
        tracker.mark_orphaned("t3", "session was interrupted", None);

        tracker.recompute_open();
        let open: Vec<String> = tracker.open_tools().cloned().collect();
        assert_eq!(open, vec!["t1".to_string()]);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let mut tracker = ToolTracker::new("s");
        tracker.handle_tool_use(&tool_use("t1", "Bash", json!({})));
        let before = tracker.calls();
        tracker.toggle_expanded("t1");
        assert!(before.get("t1").unwrap().expanded);
        assert!(!tracker.get("t1").unwrap().expanded);
    }
}
