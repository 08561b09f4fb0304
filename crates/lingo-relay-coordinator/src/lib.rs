//! Background coordinator for lingo-relay.
//!
//! Provides:
//! - `Coordinator` - Lifecycle state machine owning the live service bundle
//! - `ServiceBundle` / `ServiceFactory` - LLM-backed services built from settings
//! - Storage implementations (memory)

pub mod coordinator;
pub mod handler;
pub mod services;
pub mod storage;

pub use coordinator::{Coordinator, CoordinatorState, CoordinatorStats, LifecycleEvent};
pub use handler::CoordinatorHandler;
pub use services::{LlmContentGenerator, LlmServiceFactory, LlmTranslator, ServiceBundle, ServiceFactory};
