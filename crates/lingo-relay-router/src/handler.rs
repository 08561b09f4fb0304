//! Message handler trait.

use std::future::Future;

use async_trait::async_trait;
use lingo_relay_core::{MessageKind, RelayError, Request, Response};

/// Envelope fields a handler may need besides the typed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    /// Correlation id of the request.
    pub id: String,
    pub kind: MessageKind,
    pub timestamp: i64,
}

/// Trait for message handlers.
///
/// Returning `Err` produces an error response carrying the error's code.
/// Panics are caught by the router and reported as
/// `HANDLER_EXECUTION_ERROR`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request, meta: MessageMeta) -> Result<Response, RelayError>;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    /// Wrap an async closure.
    #[must_use]
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Request, MessageMeta) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response, RelayError>> + Send + 'static,
    {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request, MessageMeta) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, RelayError>> + Send + 'static,
{
    async fn handle(&self, request: Request, meta: MessageMeta) -> Result<Response, RelayError> {
        (self.0)(request, meta).await
    }
}
