//! In-flight request table.
//!
//! The table is the single source of truth for whether a correlation id is
//! still open. Every settlement path (response, transport failure, timeout,
//! shutdown) removes the entry under the lock, so whichever path gets there
//! first wins and the rest are no-ops.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use lingo_relay_core::{MessageKind, RelayError, Response};
use tokio::{sync::oneshot, task::AbortHandle};

/// Outcome delivered to the waiting caller.
pub type Settlement = Result<Response, RelayError>;

struct PendingRequest {
    kind: MessageKind,
    tx: oneshot::Sender<Settlement>,
    created_at: Instant,
}

/// Tracks outbound requests awaiting settlement.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request under `id`.
    ///
    /// # Errors
    /// Returns a validation error if `id` is already open.
    pub fn register(
        &self,
        id: &str,
        kind: MessageKind,
    ) -> Result<oneshot::Receiver<Settlement>, RelayError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(id) {
            return Err(RelayError::validation(format!(
                "correlation id {id} is already in flight"
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            PendingRequest {
                kind,
                tx,
                created_at: Instant::now(),
            },
        );
        Ok(rx)
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Settle `id` with `outcome`.
    ///
    /// Returns `false` if the id was unknown or already settled.
    pub fn settle(&self, id: &str, outcome: Settlement) -> bool {
        let Some(entry) = self.take(id) else {
            tracing::debug!(%id, "settlement for closed request ignored");
            return false;
        };
        tracing::trace!(
            %id,
            kind = %entry.kind,
            elapsed_ms = entry.created_at.elapsed().as_millis(),
            "request settled"
        );
        // The caller may have stopped waiting; that is not an error.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Close `id` without notifying the caller.
    ///
    /// Used by the caller itself, which already knows the outcome (its own
    /// timeout). Returns the kind if the id was still open.
    pub fn remove(&self, id: &str) -> Option<MessageKind> {
        self.take(id).map(|entry| entry.kind)
    }

    /// Settle every open request with an error built by `make_error`.
    ///
    /// Returns how many requests were settled.
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn(&str, MessageKind) -> RelayError,
    {
        let drained: Vec<(String, PendingRequest)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let count = drained.len();
        for (id, entry) in drained {
            let _ = entry.tx.send(Err(make_error(&id, entry.kind)));
        }
        count
    }

    /// Whether `id` is still awaiting settlement.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of open requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closes an entry once the waiting caller is done with it, and stops the
/// delivery still working on it.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: String,
    delivery: Option<AbortHandle>,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a PendingTable, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            delivery: None,
        }
    }

    /// Abort `delivery` when the guard drops.
    pub(crate) fn track(&mut self, delivery: AbortHandle) {
        self.delivery = Some(delivery);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
        if let Some(delivery) = self.delivery.take() {
            // No-op if the delivery already finished.
            delivery.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use lingo_relay_core::ErrorCode;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_settles_exactly_once() {
        let table = PendingTable::new();
        let rx = table.register("a", MessageKind::Ping).unwrap();

        assert!(table.settle("a", Ok(Response::success(json!(1)))));
        assert!(!table.settle("a", Ok(Response::success(json!(2)))));
        assert!(table.remove("a").is_none());

        let settled = rx.await.unwrap().unwrap();
        assert_eq!(settled, Response::success(json!(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_open_id_rejected() {
        let table = PendingTable::new();
        let _rx = table.register("dup", MessageKind::Ping).unwrap();
        let err = table.register("dup", MessageKind::GetConfig).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_id_reusable_after_settlement() {
        let table = PendingTable::new();
        let _rx = table.register("r", MessageKind::Ping).unwrap();
        assert_eq!(table.remove("r"), Some(MessageKind::Ping));
        assert!(table.register("r", MessageKind::Ping).is_ok());
    }

    #[tokio::test]
    async fn test_fail_all_settles_everything() {
        let table = PendingTable::new();
        let rx1 = table.register("1", MessageKind::Ping).unwrap();
        let rx2 = table.register("2", MessageKind::TranslateText).unwrap();

        let failed = table.fail_all(|id, kind| RelayError::Send {
            id: id.to_string(),
            kind,
            reason: "shutdown".into(),
        });
        assert_eq!(failed, 2);
        assert!(table.is_empty());

        for rx in [rx1, rx2] {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.code(), ErrorCode::SendError);
        }
    }

    #[test]
    fn test_guard_removes_abandoned_entry() {
        let table = PendingTable::new();
        let _rx = table.register("g", MessageKind::Ping).unwrap();
        {
            let _guard = PendingGuard::new(&table, "g");
        }
        assert!(!table.contains("g"));
    }

    #[tokio::test]
    async fn test_guard_aborts_tracked_delivery() {
        let table = PendingTable::new();
        let _rx = table.register("d", MessageKind::Ping).unwrap();
        let delivery = tokio::spawn(futures::future::pending::<()>());
        {
            let mut guard = PendingGuard::new(&table, "d");
            guard.track(delivery.abort_handle());
        }
        assert!(delivery.await.unwrap_err().is_cancelled());
        assert!(table.is_empty());
    }
}
