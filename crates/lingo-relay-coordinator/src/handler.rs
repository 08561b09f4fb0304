//! Router handler backed by the coordinator.

use std::sync::Weak;

use async_trait::async_trait;
use lingo_relay_core::{RelayError, Request, Response};
use lingo_relay_router::{Handler, MessageMeta};

use crate::Coordinator;

/// Forwards every request to [`Coordinator::handle`].
///
/// Holds the coordinator weakly so the router's registry does not keep it
/// alive.
pub struct CoordinatorHandler {
    coordinator: Weak<Coordinator>,
}

impl CoordinatorHandler {
    /// Handler serving `coordinator` for as long as it lives.
    #[must_use]
    pub const fn new(coordinator: Weak<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Handler for CoordinatorHandler {
    async fn handle(&self, request: Request, meta: MessageMeta) -> Result<Response, RelayError> {
        let coordinator = self
            .coordinator
            .upgrade()
            .ok_or_else(|| RelayError::not_configured("coordinator has been dropped"))?;
        tracing::debug!(id = %meta.id, kind = %meta.kind, "coordinator handling request");
        coordinator.handle(request).await
    }
}
