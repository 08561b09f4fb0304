//! Collaborator traits: transport, configuration and vocabulary storage.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{Config, ConfigPatch, ContextId, message::VocabularyInput};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No receiver attached for context '{0}'")]
    Unreachable(ContextId),
    #[error("No context answered the broadcast")]
    NoReceiver,
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("Transport closed")]
    Closed,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Delivers raw messages to other execution contexts.
///
/// A delivery yields exactly one raw response, fails, or never returns;
/// callers are expected to bound it with their own deadline.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Deliver `message` to `destination`, or broadcast when `None`.
    async fn deliver(
        &self,
        message: Value,
        destination: Option<ContextId>,
    ) -> Result<Value, TransportError>;
}

/// Receiving side of a transport.
///
/// Implementations must never panic or error: malformed input is answered
/// with a structured error response.
#[async_trait]
pub trait InboundSink: Send + Sync {
    /// Handle one raw inbound message and produce its raw response.
    async fn on_inbound(&self, raw: Value) -> Value;
}

/// Configuration store error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Stream of configuration snapshots, one per change.
pub type ConfigChanges = BoxStream<'static, Config>;

/// Trait for configuration backends.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current configuration. Returns defaults when nothing was saved yet.
    async fn get(&self) -> Result<Config, ConfigError>;

    /// Apply a partial update and return the resulting configuration.
    async fn set(&self, patch: ConfigPatch) -> Result<Config, ConfigError>;

    /// Change notifications, starting after the call.
    fn subscribe(&self) -> ConfigChanges;
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Saved vocabulary word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyEntry {
    pub id: Uuid,
    pub word: String,
    pub translation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub language: String,
    /// Epoch milliseconds.
    pub added_at: i64,
    pub updated_at: i64,
}

/// Trait for vocabulary storage backends.
#[async_trait]
pub trait VocabularyStore: Send + Sync {
    /// Add a word, or update it if the same word already exists for the language.
    async fn add(&self, input: VocabularyInput, language: &str)
    -> Result<VocabularyEntry, StorageError>;

    /// Remove a word. Returns the removed entry.
    async fn remove(&self, word: &str, language: &str) -> Result<VocabularyEntry, StorageError>;

    /// All entries, most recently updated first.
    async fn list(&self) -> Result<Vec<VocabularyEntry>, StorageError>;
}
