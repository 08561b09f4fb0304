//! Wire messages exchanged between execution contexts.
//!
//! Every request travels as an [`Envelope`]: `{id, kind, timestamp, payload}`.
//! Inside a context the payload is decoded into a [`Request`], a sum type with
//! one strongly typed variant per [`MessageKind`], so handlers match
//! exhaustively instead of poking at untyped JSON.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    ConfigPatch,
    error::{ErrorCode, RelayError},
    services::GenerationOptions,
};

/// Id used for responses to messages whose own id could not be read.
pub const UNKNOWN_ID: &str = "unknown";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Fixed set of message kinds understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Liveness check.
    Ping,
    /// Read the redacted configuration.
    GetConfig,
    /// Apply a configuration patch.
    UpdateConfig,
    /// Translate a piece of text.
    TranslateText,
    /// Save a word.
    AddToVocabulary,
    /// Forget a saved word.
    RemoveFromVocabulary,
    /// List saved words.
    GetVocabulary,
    /// Example sentences around words.
    GenerateSentences,
    /// Short article around words.
    GenerateArticle,
    /// Coordinator and cache statistics.
    GetStats,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Ping,
        Self::GetConfig,
        Self::UpdateConfig,
        Self::TranslateText,
        Self::AddToVocabulary,
        Self::RemoveFromVocabulary,
        Self::GetVocabulary,
        Self::GenerateSentences,
        Self::GenerateArticle,
        Self::GetStats,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetConfig => "get-config",
            Self::UpdateConfig => "update-config",
            Self::TranslateText => "translate-text",
            Self::AddToVocabulary => "add-to-vocabulary",
            Self::RemoveFromVocabulary => "remove-from-vocabulary",
            Self::GetVocabulary => "get-vocabulary",
            Self::GenerateSentences => "generate-sentences",
            Self::GenerateArticle => "generate-article",
            Self::GetStats => "get-stats",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a wire name is not a known [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown message kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Payload of `translate-text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    /// Text to translate.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    /// Falls back to the configured target language when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

/// Payload of `add-to-vocabulary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyInput {
    pub word: String,
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Payload of `remove-from-vocabulary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyRemoval {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Payload of `generate-sentences` and `generate-article`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Words the content must use.
    pub words: Vec<String>,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Typed request, one variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    GetConfig,
    UpdateConfig(ConfigPatch),
    TranslateText(TranslateRequest),
    AddToVocabulary(VocabularyInput),
    RemoveFromVocabulary(VocabularyRemoval),
    GetVocabulary,
    GenerateSentences(GenerateRequest),
    GenerateArticle(GenerateRequest),
    GetStats,
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

impl Request {
    /// Kind tag of this request.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Ping => MessageKind::Ping,
            Self::GetConfig => MessageKind::GetConfig,
            Self::UpdateConfig(_) => MessageKind::UpdateConfig,
            Self::TranslateText(_) => MessageKind::TranslateText,
            Self::AddToVocabulary(_) => MessageKind::AddToVocabulary,
            Self::RemoveFromVocabulary(_) => MessageKind::RemoveFromVocabulary,
            Self::GetVocabulary => MessageKind::GetVocabulary,
            Self::GenerateSentences(_) => MessageKind::GenerateSentences,
            Self::GenerateArticle(_) => MessageKind::GenerateArticle,
            Self::GetStats => MessageKind::GetStats,
        }
    }

    /// Decode a wire payload for the given kind.
    ///
    /// Kinds without a payload ignore whatever was sent.
    ///
    /// # Errors
    /// Returns error if the payload does not match the kind's shape.
    pub fn decode(kind: MessageKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            MessageKind::Ping => Self::Ping,
            MessageKind::GetConfig => Self::GetConfig,
            MessageKind::UpdateConfig => Self::UpdateConfig(parse(payload)?),
            MessageKind::TranslateText => Self::TranslateText(parse(payload)?),
            MessageKind::AddToVocabulary => Self::AddToVocabulary(parse(payload)?),
            MessageKind::RemoveFromVocabulary => Self::RemoveFromVocabulary(parse(payload)?),
            MessageKind::GetVocabulary => Self::GetVocabulary,
            MessageKind::GenerateSentences => Self::GenerateSentences(parse(payload)?),
            MessageKind::GenerateArticle => Self::GenerateArticle(parse(payload)?),
            MessageKind::GetStats => Self::GetStats,
        })
    }

    /// Encode the payload half of the wire message.
    ///
    /// # Errors
    /// Returns error if the payload cannot be represented as JSON.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Ping | Self::GetConfig | Self::GetVocabulary | Self::GetStats => Ok(Value::Null),
            Self::UpdateConfig(patch) => serde_json::to_value(patch),
            Self::TranslateText(req) => serde_json::to_value(req),
            Self::AddToVocabulary(input) => serde_json::to_value(input),
            Self::RemoveFromVocabulary(removal) => serde_json::to_value(removal),
            Self::GenerateSentences(req) | Self::GenerateArticle(req) => serde_json::to_value(req),
        }
    }
}

/// Wire message carrying one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id, unique per sender.
    pub id: String,
    /// Selects the handler on the receiving side.
    pub kind: MessageKind,
    /// Epoch milliseconds at creation.
    pub timestamp: i64,
    /// Request body; `null` for kinds without one.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wrap a request under a fresh correlation id.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded.
    pub fn new(request: &Request) -> Result<Self, RelayError> {
        Self::with_id(Uuid::new_v4().to_string(), request)
    }

    /// Wrap a request under a caller-chosen correlation id.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded.
    pub fn with_id(id: impl Into<String>, request: &Request) -> Result<Self, RelayError> {
        let payload = request
            .payload()
            .map_err(|e| RelayError::validation(format!("payload encode failed: {e}")))?;
        Ok(Self {
            id: id.into(),
            kind: request.kind(),
            timestamp: now_millis(),
            payload,
        })
    }

    /// Decode the typed request.
    ///
    /// # Errors
    /// Returns a validation error if the payload does not match the kind.
    pub fn request(&self) -> Result<Request, RelayError> {
        Request::decode(self.kind, self.payload.clone())
            .map_err(|e| RelayError::validation(format!("invalid {} payload: {e}", self.kind)))
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success {
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        error: String,
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl Response {
    /// Successful response carrying `data`.
    #[must_use]
    pub const fn success(data: Value) -> Self {
        Self::Success {
            data,
            message: None,
        }
    }

    /// Successful response with a human-readable note.
    #[must_use]
    pub fn success_with_message(data: Value, message: impl Into<String>) -> Self {
        Self::Success {
            data,
            message: Some(message.into()),
        }
    }

    /// Serialize any value into a successful response.
    ///
    /// # Errors
    /// Returns error if the value cannot be encoded.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, RelayError> {
        serde_json::to_value(value)
            .map(Self::success)
            .map_err(|e| RelayError::validation(format!("response encode failed: {e}")))
    }

    /// Error response with a stable code.
    #[must_use]
    pub fn error(code: ErrorCode, error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            code,
            details: None,
        }
    }

    /// Whether this is a success response.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error code, if this is an error response.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Error { code, .. } => Some(*code),
        }
    }

    /// Split into success data or a [`RelayError::Remote`].
    ///
    /// # Errors
    /// Returns the remote error if this is an error response.
    pub fn into_result(self) -> Result<Value, RelayError> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Error {
                error,
                code,
                details,
            } => Err(RelayError::Remote {
                code,
                message: error,
                details,
            }),
        }
    }
}

/// Wire response correlated to an [`Envelope`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request being answered.
    pub id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    /// Wrap `response` as the answer to request `id`, stamped now.
    #[must_use]
    pub fn new(id: impl Into<String>, response: Response) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            response,
        }
    }

    /// Error response for the given id.
    #[must_use]
    pub fn from_error(id: impl Into<String>, error: &RelayError) -> Self {
        Self::new(id, error.to_response())
    }
}
