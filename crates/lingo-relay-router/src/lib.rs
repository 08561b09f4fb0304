//! Message routing between execution contexts.
//!
//! Provides:
//! - `HandlerRegistry` - One handler per message kind
//! - `PendingTable` - In-flight requests keyed by correlation id
//! - `Router` - `register` / `send` / `dispatch` on top of a transport

pub mod handler;
pub mod pending;
pub mod registry;
pub mod router;

pub use handler::{FnHandler, Handler, MessageMeta};
pub use pending::PendingTable;
pub use registry::HandlerRegistry;
pub use router::{DEFAULT_REQUEST_TIMEOUT, Router};
