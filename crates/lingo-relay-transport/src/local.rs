//! In-process transport between execution contexts.
//!
//! Each context attaches its inbound sink (normally its `Router`) to a shared
//! [`LocalHub`] and sends through the [`LocalEndpoint`] the hub hands out for
//! it. The hub only holds weak references, so dropping a router detaches it.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use async_trait::async_trait;
use lingo_relay_core::{
    ChannelTransport, ContextId, ErrorCode, InboundSink, traits::TransportError,
};
use serde_json::Value;

/// Largest serialized message the hub accepts (64 MiB).
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Connects execution contexts living in the same process.
pub struct LocalHub {
    sinks: RwLock<HashMap<ContextId, Weak<dyn InboundSink>>>,
    max_message_bytes: usize,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::with_limit(MAX_MESSAGE_BYTES)
    }
}

impl LocalHub {
    /// Hub with the default message size limit.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hub rejecting messages larger than `max_message_bytes`.
    #[must_use]
    pub fn with_limit(max_message_bytes: usize) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            max_message_bytes,
        }
    }

    /// Attach `sink` as the receiver for `context`, replacing any previous one.
    pub fn attach<S>(&self, context: ContextId, sink: &Arc<S>)
    where
        S: InboundSink + 'static,
    {
        let sink: Arc<dyn InboundSink> = Arc::clone(sink) as Arc<dyn InboundSink>;
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context, Arc::downgrade(&sink));
        tracing::debug!(%context, "context attached");
    }

    /// Detach the receiver for `context`. Returns whether one was attached.
    pub fn detach(&self, context: ContextId) -> bool {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&context)
            .is_some()
    }

    /// Contexts with a live receiver.
    #[must_use]
    pub fn attached(&self) -> Vec<ContextId> {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        ContextId::ALL
            .into_iter()
            .filter(|c| sinks.get(c).is_some_and(|s| s.strong_count() > 0))
            .collect()
    }

    /// Transport for a router living in `origin`.
    #[must_use]
    pub fn endpoint(self: &Arc<Self>, origin: ContextId) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            hub: Arc::clone(self),
            origin,
        })
    }

    fn sink(&self, context: ContextId) -> Option<Arc<dyn InboundSink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context)
            .and_then(Weak::upgrade)
    }

    fn check_size(&self, message: &Value) -> Result<(), TransportError> {
        let size = serde_json::to_vec(message)?.len();
        if size > self.max_message_bytes {
            return Err(TransportError::TooLarge {
                size,
                limit: self.max_message_bytes,
            });
        }
        Ok(())
    }
}

fn is_unhandled(response: &Value) -> bool {
    response.get("code").and_then(Value::as_str) == Some(ErrorCode::HandlerNotFound.as_str())
}

/// Sending side of a [`LocalHub`] for one context.
pub struct LocalEndpoint {
    hub: Arc<LocalHub>,
    origin: ContextId,
}

impl LocalEndpoint {
    /// Context this endpoint sends from.
    #[must_use]
    pub const fn origin(&self) -> ContextId {
        self.origin
    }

    /// Offer `message` to every other context in turn.
    ///
    /// The first answer that is not `HANDLER_NOT_FOUND` wins and later
    /// contexts never see the message. If nobody handles it, the last
    /// not-found answer is returned.
    async fn broadcast(&self, message: Value) -> Result<Value, TransportError> {
        let mut unhandled = None;
        for context in ContextId::ALL {
            if context == self.origin {
                continue;
            }
            let Some(sink) = self.hub.sink(context) else {
                continue;
            };
            let response = sink.on_inbound(message.clone()).await;
            if !is_unhandled(&response) {
                return Ok(response);
            }
            tracing::trace!(origin = %self.origin, %context, "broadcast not handled");
            unhandled = Some(response);
        }
        unhandled.ok_or(TransportError::NoReceiver)
    }
}

#[async_trait]
impl ChannelTransport for LocalEndpoint {
    async fn deliver(
        &self,
        message: Value,
        destination: Option<ContextId>,
    ) -> Result<Value, TransportError> {
        self.hub.check_size(&message)?;
        match destination {
            Some(context) => {
                let sink = self
                    .hub
                    .sink(context)
                    .ok_or(TransportError::Unreachable(context))?;
                Ok(sink.on_inbound(message).await)
            }
            None => self.broadcast(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use lingo_relay_core::{MessageKind, RelayError, Request, Response};
    use lingo_relay_router::Router;
    use serde_json::json;

    use super::*;

    fn router(hub: &Arc<LocalHub>, context: ContextId) -> Arc<Router> {
        let router = Arc::new(
            Router::new(context, hub.endpoint(context)).with_timeout(Duration::from_secs(1)),
        );
        hub.attach(context, &router);
        router
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let hub = LocalHub::new();
        let agent = router(&hub, ContextId::Agent);
        let coordinator = router(&hub, ContextId::Coordinator);
        coordinator
            .register_fn(MessageKind::Ping, |_, meta| async move {
                Ok(Response::success(json!({ "pong": meta.id })))
            })
            .unwrap();

        let response = agent
            .send(&Request::Ping, Some(ContextId::Coordinator))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(agent.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_contexts_without_handler() {
        let hub = LocalHub::new();
        let panel = router(&hub, ContextId::Panel);
        let agent = router(&hub, ContextId::Agent);
        let coordinator = router(&hub, ContextId::Coordinator);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator
            .register_fn(MessageKind::GetStats, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Response::success(json!("coordinator"))) }
            })
            .unwrap();

        let data: String = panel.request(&Request::GetStats, None).await.unwrap();
        assert_eq!(data, "coordinator");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!agent.handles(MessageKind::GetStats));
    }

    #[tokio::test]
    async fn test_unhandled_broadcast_returns_not_found() {
        let hub = LocalHub::new();
        let panel = router(&hub, ContextId::Panel);
        let _agent = router(&hub, ContextId::Agent);

        let response = panel.send(&Request::GetVocabulary, None).await.unwrap();
        assert_eq!(response.code(), Some(ErrorCode::HandlerNotFound));
    }

    #[tokio::test]
    async fn test_broadcast_with_nobody_attached() {
        let hub = LocalHub::new();
        let panel = router(&hub, ContextId::Panel);

        let err = panel.send(&Request::Ping, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SendError);
    }

    #[tokio::test]
    async fn test_dropped_router_is_unreachable() {
        let hub = LocalHub::new();
        let panel = router(&hub, ContextId::Panel);
        drop(router(&hub, ContextId::Coordinator));

        assert_eq!(hub.attached(), vec![ContextId::Panel]);
        let err = panel
            .send(&Request::Ping, Some(ContextId::Coordinator))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Send { .. }));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let hub = Arc::new(LocalHub::with_limit(64));
        let endpoint = hub.endpoint(ContextId::Panel);
        let message = json!({ "payload": "x".repeat(128) });

        let err = endpoint
            .deliver(message, Some(ContextId::Coordinator))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_detach() {
        let hub = LocalHub::new();
        let _panel = router(&hub, ContextId::Panel);
        assert!(hub.detach(ContextId::Panel));
        assert!(!hub.detach(ContextId::Panel));
        assert!(hub.attached().is_empty());
    }
}
