//! Error taxonomy shared by every context.
//!
//! Callers branch on [`ErrorCode`], never on message text. Every error that
//! crosses a context boundary is turned into a [`Response::Error`] carrying
//! one of these codes.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    message::{MessageKind, Response},
    services::ServiceError,
    traits::{ConfigError, StorageError},
};

/// Stable, machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    HandlerNotFound,
    HandlerExecutionError,
    Timeout,
    SendError,
    Superseded,
    NotConfigured,
    DuplicateHandler,
    ConfigError,
    ServiceError,
    StorageError,
    /// A code this build does not know about, received from a peer.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::HandlerNotFound => "HANDLER_NOT_FOUND",
            Self::HandlerExecutionError => "HANDLER_EXECUTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::SendError => "SEND_ERROR",
            Self::Superseded => "SUPERSEDED",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::DuplicateHandler => "DUPLICATE_HANDLER",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ServiceError => "SERVICE_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid message: {reason}")]
    Validation { reason: String },
    #[error("No handler registered for '{kind}'")]
    HandlerNotFound { kind: String },
    #[error("Handler for '{kind}' failed: {message}")]
    HandlerExecution { kind: MessageKind, message: String },
    #[error("Request {id} ({kind}) timed out after {}ms", .after.as_millis())]
    Timeout {
        id: String,
        kind: MessageKind,
        after: Duration,
    },
    #[error("Failed to deliver {id} ({kind}): {reason}")]
    Send {
        id: String,
        kind: MessageKind,
        reason: String,
    },
    #[error("Call superseded for '{key}'")]
    Superseded { key: String },
    #[error("Services not configured: {0}")]
    NotConfigured(String),
    #[error("Handler already registered for '{0}'")]
    DuplicateHandler(MessageKind),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// Error response received from another context.
    #[error("{code}: {message}")]
    Remote {
        code: ErrorCode,
        message: String,
        details: Option<Value>,
    },
}

impl RelayError {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a handler execution error.
    pub fn handler(kind: MessageKind, message: impl Into<String>) -> Self {
        Self::HandlerExecution {
            kind,
            message: message.into(),
        }
    }

    /// Create a not-configured error.
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    /// Stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::HandlerNotFound { .. } => ErrorCode::HandlerNotFound,
            Self::HandlerExecution { .. } => ErrorCode::HandlerExecutionError,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Send { .. } => ErrorCode::SendError,
            Self::Superseded { .. } => ErrorCode::Superseded,
            Self::NotConfigured(_) => ErrorCode::NotConfigured,
            Self::DuplicateHandler(_) => ErrorCode::DuplicateHandler,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Service(_) => ErrorCode::ServiceError,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::Remote { code, .. } => *code,
        }
    }

    /// Structured details attached to the wire response.
    fn details(&self) -> Option<Value> {
        match self {
            Self::Timeout { id, kind, after } => Some(serde_json::json!({
                "id": id,
                "kind": kind,
                "timeoutMs": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            })),
            Self::Send { id, kind, .. } => Some(serde_json::json!({ "id": id, "kind": kind })),
            Self::HandlerNotFound { kind } => Some(serde_json::json!({ "kind": kind })),
            Self::HandlerExecution { kind, .. } => Some(serde_json::json!({ "kind": kind })),
            Self::Superseded { key } => Some(serde_json::json!({ "key": key })),
            Self::Remote { details, .. } => details.clone(),
            _ => None,
        }
    }

    /// Wire representation of this error.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let message = match self {
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Response::Error {
            error: message,
            code: self.code(),
            details: self.details(),
        }
    }
}
