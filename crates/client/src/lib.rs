//! Legion Client
//!
//! Client-side synchronization core for Legion agent sessions: message and
//! tool-call reconciliation, generation-tagged reconnecting sockets and
//! reconnect gap-fill. A single engine actor owns every store; callers read
//! immutable snapshots and subscribe to change events.

pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod stores;
pub mod transport;

pub use api::{HttpApi, MessagePage, SessionApi};
pub use bus::{EventBus, StoreEvent};
pub use config::{data_dir, ClientConfig};
pub use engine::{
    ClientSnapshot, Connections, EngineHandle, PermissionAnswer, SelectionPhase, SyncReport,
};
pub use error::{ClientError, Result};
pub use logging::{init_logging, LogFormat, LoggingHandle};
pub use stores::{OrphanInfo, ToolCall, ToolStatus};
pub use transport::{ConnectionStatus, SlotKind};
