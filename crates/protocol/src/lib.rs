//! Legion Protocol
//!
//! Shared types for communication between the Legion backend and its clients.
//! These types are serialized as JSON over REST and WebSocket.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod message;
pub mod server;
pub mod timestamp;
pub mod tool;
pub mod types;

pub use client::ClientFrame;
pub use message::*;
pub use server::ServerFrame;
pub use timestamp::Timestamp;
pub use tool::*;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
