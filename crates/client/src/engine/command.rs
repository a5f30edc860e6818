//! Commands processed by the engine actor

use legion_protocol::{PermissionDecision, SessionInfo};
use serde_json::Value;
use tokio::sync::oneshot;

use super::SyncReport;
use crate::api::MessagePage;
use crate::error::{ClientError, Result};
use crate::stores::OrphanInfo;

/// Permission answer sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionAnswer {
    pub request_id: String,
    pub decision: PermissionDecision,
    pub reasoning: Option<String>,
    pub clarification: Option<String>,
    pub selected_suggestions: Vec<Value>,
}

impl PermissionAnswer {
    pub fn allow(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: PermissionDecision::Allow,
            reasoning: None,
            clarification: None,
            selected_suggestions: Vec::new(),
        }
    }

    pub fn deny(request_id: impl Into<String>, reasoning: Option<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: PermissionDecision::Deny,
            reasoning,
            clarification: None,
            selected_suggestions: Vec::new(),
        }
    }
}

pub enum EngineCommand {
    // -- UI intents --
    RefreshSessions {
        reply: oneshot::Sender<Result<()>>,
    },
    SelectSession {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearSelection,
    ConnectUi,
    ConnectLegion {
        legion_id: String,
    },
    DisconnectLegion,
    SendMessage {
        content: String,
        reply: oneshot::Sender<Result<String>>,
    },
    RespondPermission {
        answer: PermissionAnswer,
        reply: oneshot::Sender<Result<()>>,
    },
    InterruptSession {
        reply: oneshot::Sender<Result<()>>,
    },
    SyncMessages {
        session_id: String,
        reply: oneshot::Sender<SyncReport>,
    },
    ToggleToolExpanded {
        session_id: String,
        tool_use_id: String,
        reply: oneshot::Sender<Option<bool>>,
    },
    MarkToolUseOrphaned {
        session_id: String,
        tool_use_id: String,
        reason: String,
    },
    GetOrphanedInfo {
        session_id: String,
        tool_use_id: String,
        reply: oneshot::Sender<Option<OrphanInfo>>,
    },
    SetDraft {
        session_id: String,
        text: String,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // -- Continuations from spawned tasks --
    SessionsFetched {
        result: Result<Vec<SessionInfo>>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Selection {
        epoch: u64,
        step: SelectionStep,
    },
    SyncFetched {
        session_id: String,
        generation: u64,
        result: Result<MessagePage>,
        reply: Option<oneshot::Sender<SyncReport>>,
    },
}

/// Progress reported by a selection task
pub enum SelectionStep {
    /// Latest session record (fetch or auto-start poll)
    Session(SessionInfo),
    /// History fetched; the engine replays it and opens the session socket
    History(MessagePage),
    Failed(ClientError),
}
