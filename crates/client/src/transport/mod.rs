//! Socket channels: UI-global, per-session and per-legion
//!
//! Each logical channel owns at most one live socket. Connection attempts
//! are numbered by a generation counter and every event a driver emits is
//! tagged with the generation it belongs to, so the engine can drop output
//! from superseded attempts.

pub mod machine;
pub mod socket;

use legion_protocol::{ClientFrame, ServerFrame};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::Result;

pub use machine::{ChannelMachine, CloseAction, OpenKind, ReconnectPolicy};
pub use socket::ChannelSlot;

/// Which of the three sockets a channel lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Ui,
    Session,
    Legion,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Ui => "ui",
            SlotKind::Session => "session",
            SlotKind::Legion => "legion",
        }
    }
}

/// A concrete channel target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Ui,
    Session(String),
    Legion(String),
}

impl ChannelKind {
    pub fn slot(&self) -> SlotKind {
        match self {
            ChannelKind::Ui => SlotKind::Ui,
            ChannelKind::Session(_) => SlotKind::Session,
            ChannelKind::Legion(_) => SlotKind::Legion,
        }
    }

    pub fn path(&self) -> String {
        match self {
            ChannelKind::Ui => "/ws/ui".to_string(),
            ChannelKind::Session(id) => format!("/ws/session/{}", urlencoding::encode(id)),
            ChannelKind::Legion(id) => format!("/ws/legion/{}", urlencoding::encode(id)),
        }
    }

    pub fn url(&self, ws_base: &str) -> String {
        format!("{}{}", ws_base.trim_end_matches('/'), self.path())
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ChannelKind::Session(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Ui => write!(f, "ui"),
            ChannelKind::Session(id) => write!(f, "session:{id}"),
            ChannelKind::Legion(id) => write!(f, "legion:{id}"),
        }
    }
}

/// Per-channel status shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
    /// Retry budget exhausted
    Failed,
}

/// Driver → engine
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Status {
        channel: ChannelKind,
        generation: u64,
        status: ConnectionStatus,
    },
    Opened {
        channel: ChannelKind,
        generation: u64,
        kind: OpenKind,
    },
    Frame {
        channel: ChannelKind,
        generation: u64,
        frame: ServerFrame,
    },
}

impl ChannelEvent {
    pub fn channel(&self) -> &ChannelKind {
        match self {
            ChannelEvent::Status { channel, .. }
            | ChannelEvent::Opened { channel, .. }
            | ChannelEvent::Frame { channel, .. } => channel,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            ChannelEvent::Status { generation, .. }
            | ChannelEvent::Opened { generation, .. }
            | ChannelEvent::Frame { generation, .. } => *generation,
        }
    }
}

/// The three channel slots
pub struct Transport {
    ui: ChannelSlot,
    session: ChannelSlot,
    legion: ChannelSlot,
}

impl Transport {
    pub fn new(config: &ClientConfig, events: mpsc::Sender<ChannelEvent>) -> Self {
        let ws_base = config.ws_base();
        let policy = ReconnectPolicy::from_config(config);
        let close_timeout = config.close_timeout();
        let slot = |kind| ChannelSlot::new(kind, &ws_base, policy, close_timeout, events.clone());
        Self {
            ui: slot(SlotKind::Ui),
            session: slot(SlotKind::Session),
            legion: slot(SlotKind::Legion),
        }
    }

    pub fn slot(&self, kind: SlotKind) -> &ChannelSlot {
        match kind {
            SlotKind::Ui => &self.ui,
            SlotKind::Session => &self.session,
            SlotKind::Legion => &self.legion,
        }
    }

    pub fn slot_mut(&mut self, kind: SlotKind) -> &mut ChannelSlot {
        match kind {
            SlotKind::Ui => &mut self.ui,
            SlotKind::Session => &mut self.session,
            SlotKind::Legion => &mut self.legion,
        }
    }

    /// Close whatever the slot holds, then open `target`.
    pub async fn connect(&mut self, target: ChannelKind) -> u64 {
        self.slot_mut(target.slot()).connect(target).await
    }

    pub async fn close(&mut self, kind: SlotKind) {
        self.slot_mut(kind).close().await;
    }

    pub async fn close_all(&mut self) {
        self.ui.close().await;
        self.session.close().await;
        self.legion.close().await;
    }

    pub fn send(&self, kind: SlotKind, frame: ClientFrame) -> Result<()> {
        self.slot(kind).send(frame)
    }

    /// True when `event` comes from the slot's current connection attempt.
    pub fn accepts(&self, event: &ChannelEvent) -> bool {
        let slot = self.slot(event.channel().slot());
        slot.target() == Some(event.channel()) && slot.generation() == event.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_urls() {
        let base = "ws://127.0.0.1:8000/";
        assert_eq!(ChannelKind::Ui.url(base), "ws://127.0.0.1:8000/ws/ui");
        assert_eq!(
            ChannelKind::Session("abc".into()).url(base),
            "ws://127.0.0.1:8000/ws/session/abc"
        );
        assert_eq!(
            ChannelKind::Legion("team one".into()).url(base),
            "ws://127.0.0.1:8000/ws/legion/team%20one"
        );
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(ConnectionStatus::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "reconnecting", "attempt": 2}));
    }
}
