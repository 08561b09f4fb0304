//! Message router for one execution context.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use lingo_relay_core::{
    ChannelTransport, ContextId, Envelope, InboundSink, MessageKind, RelayError, Request,
    Response, ResponseEnvelope,
    message::{UNKNOWN_ID, now_millis},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;

use crate::{
    FnHandler, Handler, HandlerRegistry, MessageMeta, PendingTable, pending::PendingGuard,
};

/// Default deadline for an outbound request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes messages for one execution context.
///
/// Owns the context's [`HandlerRegistry`] and [`PendingTable`]. Construct
/// one per context at bootstrap and share it as `Arc<Router>`.
pub struct Router {
    context: ContextId,
    transport: Arc<dyn ChannelTransport>,
    registry: HandlerRegistry,
    pending: Arc<PendingTable>,
    request_timeout: Duration,
}

impl Router {
    /// Create a router sending through `transport`.
    #[must_use]
    pub fn new(context: ContextId, transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            context,
            transport,
            registry: HandlerRegistry::new(),
            pending: Arc::new(PendingTable::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the outbound request deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Context this router serves.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Deadline applied to every outbound request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Register the handler for `kind`.
    ///
    /// # Errors
    /// Returns `DuplicateHandler` if `kind` is already handled.
    pub fn register(&self, kind: MessageKind, handler: Arc<dyn Handler>) -> Result<(), RelayError> {
        self.registry.register(kind, handler)
    }

    /// Register an async closure as the handler for `kind`.
    ///
    /// # Errors
    /// Returns `DuplicateHandler` if `kind` is already handled.
    pub fn register_fn<F, Fut>(&self, kind: MessageKind, f: F) -> Result<(), RelayError>
    where
        F: Fn(Request, MessageMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RelayError>> + Send + 'static,
    {
        self.registry.register(kind, Arc::new(FnHandler::new(f)))
    }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn handles(&self, kind: MessageKind) -> bool {
        self.registry.contains(kind)
    }

    /// Remove the handler for `kind`. Returns `false` if there was none.
    pub fn unregister(&self, kind: MessageKind) -> bool {
        self.registry.unregister(kind)
    }

    /// Remove every handler. Returns how many were removed.
    pub fn clear_handlers(&self) -> usize {
        let count = self.registry.clear();
        tracing::info!(context = %self.context, count, "handlers cleared");
        count
    }

    /// Number of outbound requests still awaiting settlement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a request under a fresh correlation id.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing settles the request in time, `Send` if
    /// the transport fails, or a validation error for an unencodable payload.
    /// Error responses from the remote handler are returned as `Ok`.
    pub async fn send(
        &self,
        request: &Request,
        destination: Option<ContextId>,
    ) -> Result<Response, RelayError> {
        self.send_envelope(Envelope::new(request)?, destination).await
    }

    /// Send a request and decode its success data into `T`.
    ///
    /// # Errors
    /// As [`Router::send`]; additionally an error response becomes
    /// [`RelayError::Remote`] and undecodable data a validation error.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: &Request,
        destination: Option<ContextId>,
    ) -> Result<T, RelayError> {
        let data = self.send(request, destination).await?.into_result()?;
        serde_json::from_value(data)
            .map_err(|e| RelayError::validation(format!("unexpected {} result: {e}", request.kind())))
    }

    /// Send a pre-built envelope, keeping its id.
    ///
    /// # Errors
    /// See [`Router::send`]. Also fails if the envelope's id is already in flight.
    pub async fn send_envelope(
        &self,
        envelope: Envelope,
        destination: Option<ContextId>,
    ) -> Result<Response, RelayError> {
        let id = envelope.id.clone();
        let kind = envelope.kind;
        let raw = serde_json::to_value(&envelope)
            .map_err(|e| RelayError::validation(format!("envelope encode failed: {e}")))?;

        let mut rx = self.pending.register(&id, kind)?;
        let mut guard = PendingGuard::new(&self.pending, &id);

        tracing::debug!(context = %self.context, %id, %kind, ?destination, "sending");
        guard.track(self.spawn_delivery(id.clone(), kind, raw, destination));

        match tokio::time::timeout(self.request_timeout, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(RelayError::Send {
                id,
                kind,
                reason: "request dropped before settlement".to_string(),
            }),
            Err(_) => {
                if self.pending.remove(&id).is_some() {
                    tracing::warn!(context = %self.context, %id, %kind, "request timed out");
                    Err(RelayError::Timeout {
                        id,
                        kind,
                        after: self.request_timeout,
                    })
                } else {
                    // Settled between the deadline firing and us reaching the table.
                    rx.await.unwrap_or_else(|_| {
                        Err(RelayError::Send {
                            id,
                            kind,
                            reason: "request dropped before settlement".to_string(),
                        })
                    })
                }
            }
        }
    }

    fn spawn_delivery(
        &self,
        id: String,
        kind: MessageKind,
        raw: Value,
        destination: Option<ContextId>,
    ) -> AbortHandle {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let context = self.context;

        tokio::spawn(async move {
            let outcome = match transport.deliver(raw, destination).await {
                Ok(raw_response) => match serde_json::from_value::<ResponseEnvelope>(raw_response) {
                    Ok(response) if response.id == id => Ok(response.response),
                    Ok(response) => {
                        tracing::warn!(
                            %context,
                            expected = %id,
                            got = %response.id,
                            "response correlated to a different request"
                        );
                        pending.settle(&response.id, Ok(response.response));
                        return;
                    }
                    Err(e) => Err(RelayError::validation(format!("malformed response: {e}"))),
                },
                Err(e) => {
                    tracing::error!(%context, %id, %kind, "delivery failed: {e}");
                    Err(RelayError::Send {
                        id: id.clone(),
                        kind,
                        reason: e.to_string(),
                    })
                }
            };
            if !pending.settle(&id, outcome) {
                tracing::debug!(%context, %id, "late delivery result discarded");
            }
        })
        .abort_handle()
    }

    /// Handle one raw inbound message.
    ///
    /// Never panics and never fails: malformed input, unknown kinds and
    /// failing handlers all produce a structured error response.
    pub async fn dispatch(&self, raw: Value) -> ResponseEnvelope {
        let (envelope, kind) = match validate(raw) {
            Ok(parsed) => parsed,
            Err(rejection) => {
                tracing::warn!(
                    context = %self.context,
                    id = %rejection.id,
                    "rejected inbound message"
                );
                return rejection;
            }
        };
        let id = envelope.id.clone();

        let Some(handler) = self.registry.get(kind) else {
            tracing::debug!(context = %self.context, %id, %kind, "no handler");
            return ResponseEnvelope::from_error(
                id,
                &RelayError::HandlerNotFound {
                    kind: kind.to_string(),
                },
            );
        };

        let request = match envelope.request() {
            Ok(request) => request,
            Err(e) => return ResponseEnvelope::from_error(id, &e),
        };
        let meta = MessageMeta {
            id: id.clone(),
            kind,
            timestamp: envelope.timestamp,
        };

        tracing::debug!(context = %self.context, %id, %kind, "dispatching");
        let response = match AssertUnwindSafe(handler.handle(request, meta))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(context = %self.context, %id, %kind, code = %e.code(), "handler returned error: {e}");
                e.to_response()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(context = %self.context, %id, %kind, "handler panicked: {message}");
                RelayError::handler(kind, message).to_response()
            }
        };
        ResponseEnvelope::new(id, response)
    }

    /// Clear all handlers and fail every outbound request still in flight.
    pub fn shutdown(&self) {
        self.clear_handlers();
        let failed = self.pending.fail_all(|id, kind| RelayError::Send {
            id: id.to_string(),
            kind,
            reason: "router shut down".to_string(),
        });
        if failed > 0 {
            tracing::info!(context = %self.context, failed, "in-flight requests failed on shutdown");
        }
    }
}

#[async_trait]
impl InboundSink for Router {
    async fn on_inbound(&self, raw: Value) -> Value {
        let response = self.dispatch(raw).await;
        serde_json::to_value(&response).unwrap_or_else(|e| {
            serde_json::json!({
                "id": response.id,
                "timestamp": now_millis(),
                "status": "error",
                "error": format!("response encode failed: {e}"),
                "code": "VALIDATION_ERROR",
            })
        })
    }
}

fn reject(id: &str, reason: &str) -> ResponseEnvelope {
    ResponseEnvelope::from_error(id, &RelayError::validation(reason))
}

/// Check the envelope shape field by field so each failure gets a precise
/// response, then resolve the kind.
fn validate(raw: Value) -> Result<(Envelope, MessageKind), ResponseEnvelope> {
    let Value::Object(mut map) = raw else {
        return Err(reject(UNKNOWN_ID, "message must be a JSON object"));
    };
    let Some(Value::String(id)) = map.remove("id") else {
        return Err(reject(UNKNOWN_ID, "missing or non-string id"));
    };
    let Some(Value::String(kind_name)) = map.remove("kind") else {
        return Err(reject(&id, "missing or non-string kind"));
    };
    let Some(timestamp) = read_timestamp(&map) else {
        return Err(reject(&id, "missing or non-numeric timestamp"));
    };
    let Ok(kind) = kind_name.parse::<MessageKind>() else {
        return Err(ResponseEnvelope::from_error(
            id,
            &RelayError::HandlerNotFound { kind: kind_name },
        ));
    };
    let payload = map.remove("payload").unwrap_or(Value::Null);
    Ok((
        Envelope {
            id,
            kind,
            timestamp,
            payload,
        },
        kind,
    ))
}

#[allow(clippy::cast_possible_truncation)]
fn read_timestamp(map: &Map<String, Value>) -> Option<i64> {
    match map.get("timestamp") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
