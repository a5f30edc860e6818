pub mod entities;
pub mod message_store;
pub mod session_store;
pub mod signature;
pub mod tool_calls;

pub use entities::EntityStores;
pub use message_store::{AddOutcome, HistoryLoad, MessageStore, SyncOutcome};
pub use session_store::{SessionLookup, SessionStore, StartPlan, Transition};
pub use tool_calls::{OrphanInfo, ToolCall, ToolCallTable, ToolResult, ToolStatus, ToolTracker};
