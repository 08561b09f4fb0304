//! Per-context handler table.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use lingo_relay_core::{MessageKind, RelayError};

use crate::Handler;

/// Maps each message kind to at most one handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// # Errors
    /// Returns `DuplicateHandler` if `kind` already has one; the existing
    /// handler is kept.
    pub fn register(&self, kind: MessageKind, handler: Arc<dyn Handler>) -> Result<(), RelayError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&kind) {
            return Err(RelayError::DuplicateHandler(kind));
        }
        handlers.insert(kind, handler);
        tracing::debug!(%kind, "handler registered");
        Ok(())
    }

    /// Look up the handler for `kind`.
    #[must_use]
    pub fn get(&self, kind: MessageKind) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    /// Whether `kind` has a handler.
    #[must_use]
    pub fn contains(&self, kind: MessageKind) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Remove the handler for `kind`. Returns whether one was present.
    pub fn unregister(&self, kind: MessageKind) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
            .is_some()
    }

    /// Remove every handler. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let count = handlers.len();
        handlers.clear();
        count
    }

    /// Registered kinds, in no particular order.
    #[must_use]
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use lingo_relay_core::{ErrorCode, Response};

    use super::*;
    use crate::FnHandler;

    fn ok_handler() -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(|_, _| async { Ok(Response::success(serde_json::Value::Null)) }))
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = HandlerRegistry::new();
        registry.register(MessageKind::Ping, ok_handler()).unwrap();

        let err = registry.register(MessageKind::Ping, ok_handler()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateHandler);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = HandlerRegistry::new();
        registry.register(MessageKind::Ping, ok_handler()).unwrap();
        registry.register(MessageKind::GetConfig, ok_handler()).unwrap();

        assert!(registry.unregister(MessageKind::Ping));
        assert!(!registry.unregister(MessageKind::Ping));
        assert!(registry.contains(MessageKind::GetConfig));

        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        registry.register(MessageKind::Ping, ok_handler()).unwrap();
    }
}
