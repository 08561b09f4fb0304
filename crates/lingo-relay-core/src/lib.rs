//! Core abstractions for lingo-relay.
//!
//! This crate provides the fundamental building blocks shared by every
//! execution context:
//! - `Envelope` / `Request` / `Response` - Typed wire messages
//! - `RelayError` / `ErrorCode` - Error taxonomy with stable codes
//! - `Config` / `ConfigPatch` - Live configuration
//! - Transport, storage and service traits

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod services;
pub mod traits;

pub use config::{Config, ConfigPatch, ProviderSettings, Tuning};
pub use context::ContextId;
pub use error::{ErrorCode, RelayError};
pub use message::{Envelope, MessageKind, Request, Response, ResponseEnvelope};
pub use traits::{ChannelTransport, ConfigStore, InboundSink, VocabularyStore};
