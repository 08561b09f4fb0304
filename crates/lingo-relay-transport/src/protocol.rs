//! Wire frames for socket transports.

use lingo_relay_core::{RelayError, ResponseEnvelope, message::UNKNOWN_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame exchanged over a socket.
///
/// Requests carry the raw envelope so that malformed messages still reach
/// the router and get a precise error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Envelope to dispatch on the receiving side.
    Request { message: Value },
    /// Response envelope answering an earlier request.
    Response { message: Value },
    /// Keepalive.
    Ping,
    /// Keepalive reply.
    Pong,
}

impl Frame {
    /// Response frame for a frame that could not be parsed at all.
    #[must_use]
    pub fn rejection(reason: impl Into<String>) -> Self {
        let envelope = ResponseEnvelope::from_error(UNKNOWN_ID, &RelayError::validation(reason));
        Self::Response {
            message: serde_json::to_value(&envelope).unwrap_or(Value::Null),
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns the rejection frame to send back when the text is not a frame.
    pub fn parse(text: &str) -> Result<Self, Self> {
        serde_json::from_str(text).map_err(|e| {
            tracing::warn!("Invalid frame: {e}");
            Self::rejection(format!("invalid frame: {e}"))
        })
    }
}
