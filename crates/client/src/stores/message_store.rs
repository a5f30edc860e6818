//! Per-session message log and derived tool-call table
//!
//! The log stays sorted ascending by normalized timestamp after every merge.
//! History loads, live frames and reconnect gap-fills all go through the
//! same extraction step so the tool table converges regardless of load path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use legion_protocol::{
    DisplayMetadata, Message, MessagePayload, PermissionRequest, PermissionResponse, SessionState,
    ToolCallEvent, ToolResultBlock, ToolUseBlock,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::session_store::SessionLookup;
use super::tool_calls::{OrphanInfo, ToolCall, ToolCallTable, ToolTracker};

pub const TERMINATED_REASON: &str = "session was terminated";

/// Orphan reason for a transition into a non-live state
pub fn orphan_reason_for(state: SessionState) -> &'static str {
    match state {
        SessionState::Error => "session ended with an error",
        SessionState::Created => "session was restarted",
        _ => TERMINATED_REASON,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryLoad {
    pub loaded: usize,
    pub open_tools: usize,
    pub orphaned: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub synced: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
struct SessionLog {
    messages: Arc<Vec<Message>>,
    ids: HashSet<String>,
    watermark: Option<i64>,
    tools: ToolTracker,
    init_data: Option<Value>,
}

impl SessionLog {
    fn new(session_id: &str) -> Self {
        Self {
            tools: ToolTracker::new(session_id),
            ..Default::default()
        }
    }

    /// Run one message through tool/permission/init extraction.
    fn extract(&mut self, session_id: &str, message: &Message) {
        let display = message
            .metadata
            .display
            .as_ref()
            .filter(|d| !d.is_empty());
        if let Some(display) = display {
            self.tools.apply_display_links(display);
        }

        match message.payload() {
            None => {
                warn!(
                    component = "message_store",
                    event = "message.malformed",
                    session_id = %session_id,
                    message_id = %message.message_id,
                    message_type = ?message.message_type,
                    "Message metadata does not match its type, skipping extraction"
                );
            }
            Some(MessagePayload::Assistant { tool_uses }) => {
                for block in tool_uses {
                    self.tools.handle_tool_use(block);
                }
            }
            Some(MessagePayload::User { tool_results }) => {
                for block in tool_results {
                    self.tools.handle_tool_result(block);
                }
            }
            Some(MessagePayload::System { .. }) => {
                if let Some(init) = message.init_data() {
                    self.init_data = Some(init.clone());
                }
            }
            Some(MessagePayload::PermissionRequest(request)) => {
                self.tools.handle_permission_request(request);
            }
            Some(MessagePayload::PermissionResponse(response)) => {
                self.tools.handle_permission_response(response);
            }
            Some(MessagePayload::ToolCall(event)) => {
                self.tools.handle_tool_call(event);
            }
            Some(MessagePayload::Unknown) => {}
        }

        if let Some(display) = display {
            self.tools.apply_display_states(display);
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    sessions: HashMap<String, SessionLog>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log_mut(&mut self, session_id: &str) -> &mut SessionLog {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog::new(session_id))
    }

    // -----------------------------------------------------------------------
    // Log mutation
    // -----------------------------------------------------------------------

    /// Replace a session's log with fetched history and replay it.
    ///
    /// Tool calls seen before survive (same records, updated in place). Tool
    /// uses still open after replay are orphaned when the session is not live.
    pub fn load_history(
        &mut self,
        session_id: &str,
        history: Vec<Message>,
        sessions: &dyn SessionLookup,
    ) -> HistoryLoad {
        let mut seen = HashSet::with_capacity(history.len());
        let mut messages: Vec<Message> = history
            .into_iter()
            .filter(|m| seen.insert(m.message_id.clone()))
            .collect();
        messages.sort_by_key(Message::millis);

        let log = self.log_mut(session_id);
        log.ids = seen;
        log.watermark = messages.last().map(Message::millis);
        for message in &messages {
            log.extract(session_id, message);
        }
        log.tools.recompute_open();
        let loaded = messages.len();
        log.messages = Arc::new(messages);

        let open_tools = log.tools.open_tools().count();
        let orphaned = match sessions.session_state(session_id) {
            Some(state) if !state.is_live() => log.tools.orphan_open_tools(TERMINATED_REASON).len(),
            _ => 0,
        };

        debug!(
            component = "message_store",
            event = "history.loaded",
            session_id = %session_id,
            loaded,
            open_tools,
            orphaned,
            "Session history replayed"
        );
        HistoryLoad {
            loaded,
            open_tools,
            orphaned,
        }
    }

    /// Append one live message; a known id is a no-op.
    pub fn add_message(&mut self, session_id: &str, message: Message) -> AddOutcome {
        let log = self.log_mut(session_id);
        if log.ids.contains(&message.message_id) {
            debug!(
                component = "message_store",
                event = "message.duplicate",
                session_id = %session_id,
                message_id = %message.message_id,
                "Duplicate message ignored"
            );
            return AddOutcome::Duplicate;
        }

        let ts = message.millis();
        log.ids.insert(message.message_id.clone());
        log.watermark = Some(ts);
        log.extract(session_id, &message);

        let messages = Arc::make_mut(&mut log.messages);
        let at = messages.partition_point(|m| m.millis() <= ts);
        messages.insert(at, message);
        AddOutcome::Added
    }

    /// Merge a reconnect gap-fill batch past the watermark.
    pub fn merge_sync(
        &mut self,
        session_id: &str,
        fetched: Vec<Message>,
        truncated: bool,
    ) -> SyncOutcome {
        let log = self.log_mut(session_id);
        let watermark = log.watermark;

        let mut batch_ids = HashSet::new();
        let mut batch: Vec<Message> = fetched
            .into_iter()
            .filter(|m| watermark.map_or(true, |w| m.millis() > w))
            .filter(|m| !log.ids.contains(&m.message_id))
            .filter(|m| batch_ids.insert(m.message_id.clone()))
            .collect();

        if batch.is_empty() {
            return SyncOutcome {
                synced: 0,
                truncated,
            };
        }
        batch.sort_by_key(Message::millis);

        for message in &batch {
            log.extract(session_id, message);
        }
        log.ids.extend(batch_ids);
        log.watermark = batch.last().map(Message::millis).or(watermark);

        let synced = batch.len();
        let messages = Arc::make_mut(&mut log.messages);
        let appendable = match (messages.last(), batch.first()) {
            (Some(tail), Some(head)) => head.millis() >= tail.millis(),
            _ => true,
        };
        messages.extend(batch);
        if !appendable {
            messages.sort_by_key(Message::millis);
        }

        debug!(
            component = "message_store",
            event = "sync.merged",
            session_id = %session_id,
            synced,
            truncated,
            interleaved = !appendable,
            "Reconnect gap merged"
        );
        SyncOutcome { synced, truncated }
    }

    pub fn clear_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    // -----------------------------------------------------------------------
    // Live tool lifecycle frames
    // -----------------------------------------------------------------------

    pub fn handle_tool_use(&mut self, session_id: &str, block: &ToolUseBlock) {
        self.log_mut(session_id).tools.handle_tool_use(block);
    }

    pub fn handle_tool_result(&mut self, session_id: &str, block: &ToolResultBlock) {
        self.log_mut(session_id).tools.handle_tool_result(block);
    }

    pub fn handle_permission_request(
        &mut self,
        session_id: &str,
        request: &PermissionRequest,
    ) -> Option<String> {
        self.log_mut(session_id)
            .tools
            .handle_permission_request(request)
    }

    pub fn handle_permission_response(
        &mut self,
        session_id: &str,
        response: &PermissionResponse,
    ) -> Option<String> {
        self.log_mut(session_id)
            .tools
            .handle_permission_response(response)
    }

    pub fn handle_tool_call(&mut self, session_id: &str, event: &ToolCallEvent) {
        self.log_mut(session_id).tools.handle_tool_call(event);
    }

    pub fn apply_display(&mut self, session_id: &str, display: &DisplayMetadata) {
        let tools = &mut self.log_mut(session_id).tools;
        tools.apply_display_links(display);
        tools.apply_display_states(display);
    }

    // -----------------------------------------------------------------------
    // Orphans and UI flags
    // -----------------------------------------------------------------------

    pub fn mark_tool_use_orphaned(
        &mut self,
        session_id: &str,
        tool_use_id: &str,
        reason: &str,
        message: Option<&str>,
    ) {
        self.log_mut(session_id)
            .tools
            .mark_orphaned(tool_use_id, reason, message);
    }

    pub fn is_tool_use_orphaned(&self, session_id: &str, tool_use_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|log| log.tools.is_orphaned(tool_use_id))
    }

    pub fn orphaned_info(&self, session_id: &str, tool_use_id: &str) -> Option<&OrphanInfo> {
        self.sessions.get(session_id)?.tools.orphan_info(tool_use_id)
    }

    /// Orphan every open tool after the session left the live states.
    pub fn on_session_state(&mut self, session_id: &str, state: SessionState) -> Vec<String> {
        if state.is_live() {
            return Vec::new();
        }
        let Some(log) = self.sessions.get_mut(session_id) else {
            return Vec::new();
        };
        let marked = log.tools.orphan_open_tools(orphan_reason_for(state));
        if !marked.is_empty() {
            debug!(
                component = "message_store",
                event = "tools.orphaned",
                session_id = %session_id,
                state = state.as_str(),
                count = marked.len(),
                "Open tool uses orphaned by state change"
            );
        }
        marked
    }

    pub fn toggle_tool_expanded(&mut self, session_id: &str, tool_use_id: &str) -> Option<bool> {
        self.sessions
            .get_mut(session_id)?
            .tools
            .toggle_expanded(tool_use_id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn messages(&self, session_id: &str) -> Arc<Vec<Message>> {
        self.sessions
            .get(session_id)
            .map(|log| Arc::clone(&log.messages))
            .unwrap_or_default()
    }

    pub fn tool_calls(&self, session_id: &str) -> Arc<ToolCallTable> {
        self.sessions
            .get(session_id)
            .map(|log| log.tools.calls())
            .unwrap_or_default()
    }

    pub fn tool_call(&self, session_id: &str, tool_use_id: &str) -> Option<&ToolCall> {
        self.sessions.get(session_id)?.tools.get(tool_use_id)
    }

    pub fn watermark(&self, session_id: &str) -> Option<i64> {
        self.sessions.get(session_id)?.watermark
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |log| log.messages.len())
    }

    pub fn init_data(&self, session_id: &str) -> Option<&Value> {
        self.sessions.get(session_id)?.init_data.as_ref()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &String> {
        self.sessions.keys()
    }
}
