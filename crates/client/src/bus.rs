//! Change notifications published by the engine after it mutates a store.

use legion_protocol::SessionState;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::SyncReport;
use crate::transport::{ConnectionStatus, SlotKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    SessionsListChanged,
    SessionChanged {
        session_id: String,
        state: SessionState,
    },
    SessionRemoved {
        session_id: String,
    },
    SessionSelected {
        session_id: String,
    },
    SelectionFailed {
        session_id: String,
        error: String,
    },
    HistoryLoaded {
        session_id: String,
        loaded: usize,
    },
    MessagesChanged {
        session_id: String,
    },
    ToolCallsChanged {
        session_id: String,
    },
    ToolsOrphaned {
        session_id: String,
        tool_use_ids: Vec<String>,
    },
    PermissionRequested {
        session_id: String,
        request_id: String,
        tool_use_id: Option<String>,
    },
    ConnectionChanged {
        channel: SlotKind,
        status: ConnectionStatus,
    },
    SyncCompleted {
        session_id: String,
        report: SyncReport,
    },
    SyncFailed {
        session_id: String,
        error: String,
    },
    ResourcesChanged {
        session_id: String,
    },
    QueueChanged {
        session_id: String,
    },
    TasksChanged {
        session_id: String,
    },
    SchedulesChanged {
        session_id: String,
    },
    LegionMessage {
        legion_id: String,
        comm_id: String,
    },
    ServerError {
        session_id: Option<String>,
        message: String,
    },
}

/// Broadcast wrapper; publishing with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = StoreEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
