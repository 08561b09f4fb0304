//! Transports connecting lingo-relay execution contexts.
//!
//! Provides:
//! - `LocalHub` - In-process delivery between attached contexts
//! - Wire frames for socket transports
//! - WebSocket endpoint (feature: websocket)

pub mod local;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use local::{LocalEndpoint, LocalHub, MAX_MESSAGE_BYTES};
pub use protocol::Frame;
