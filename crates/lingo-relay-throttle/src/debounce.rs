//! Per-key debouncing with supersession.
//!
//! Each key holds at most one waiting job. Scheduling again before the quiet
//! period ends rejects the waiting caller with [`RelayError::Superseded`] and
//! restarts the timer with the new job. A job that has started running is out
//! of the slot and finishes for its own caller.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use lingo_relay_core::RelayError;
use tokio::{sync::oneshot, task::AbortHandle};

/// Default quiet period before a scheduled job runs.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);

type Outcome<T> = Result<T, RelayError>;

struct Slot<T> {
    generation: u64,
    job: BoxFuture<'static, Outcome<T>>,
    tx: oneshot::Sender<Outcome<T>>,
    timer: AbortHandle,
}

impl<T> Slot<T> {
    fn reject(self, key: &str) {
        self.timer.abort();
        // Dropped without being polled.
        drop(self.job);
        let _ = self.tx.send(Err(RelayError::Superseded {
            key: key.to_string(),
        }));
    }
}

type Slots<T> = Arc<Mutex<HashMap<String, Slot<T>>>>;

fn lock<T>(slots: &Slots<T>) -> std::sync::MutexGuard<'_, HashMap<String, Slot<T>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coalesces rapid calls per key.
pub struct DebounceQueue<T> {
    quiet_period: Duration,
    slots: Slots<T>,
    next_generation: AtomicU64,
}

impl<T: Send + 'static> Default for DebounceQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}

impl<T: Send + 'static> DebounceQueue<T> {
    /// Create a queue running jobs after `quiet_period` of silence per key.
    #[must_use]
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Time a job waits without a newer call before it runs.
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Schedule `job` under `key`.
    ///
    /// The slot is claimed immediately; `job` is not polled until the quiet
    /// period passes without another call for the same key. Must be called
    /// from within a tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, job: F) -> Scheduled<T>
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let previous = {
            // The timer may not look at the slots before its own slot is in.
            let mut slots = lock(&self.slots);
            let timer = tokio::spawn(fire(
                Arc::clone(&self.slots),
                key.clone(),
                generation,
                self.quiet_period,
            ))
            .abort_handle();
            slots.insert(
                key.clone(),
                Slot {
                    generation,
                    job: Box::pin(job),
                    tx,
                    timer,
                },
            )
        };
        if let Some(previous) = previous {
            tracing::debug!(%key, "superseding waiting call");
            previous.reject(&key);
        }

        Scheduled { key, rx }
    }

    /// Keys with a job still waiting out its quiet period.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<String> {
        lock(&self.slots).keys().cloned().collect()
    }

    /// Reject every waiting caller. Running jobs are unaffected.
    ///
    /// Returns how many callers were rejected.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, Slot<T>)> = lock(&self.slots).drain().collect();
        let count = drained.len();
        for (key, slot) in drained {
            slot.reject(&key);
        }
        if count > 0 {
            tracing::debug!(count, "cancelled waiting calls");
        }
        count
    }

    /// Number of keys with a waiting job.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for DebounceQueue<T> {
    fn drop(&mut self) {
        let drained: Vec<(String, Slot<T>)> = lock(&self.slots).drain().collect();
        for (key, slot) in drained {
            slot.reject(&key);
        }
    }
}

async fn fire<T>(slots: Slots<T>, key: String, generation: u64, quiet_period: Duration) {
    tokio::time::sleep(quiet_period).await;

    let slot = {
        let mut slots = lock(&slots);
        match slots.get(&key) {
            Some(slot) if slot.generation == generation => slots.remove(&key),
            _ => None,
        }
    };
    let Some(Slot { job, tx, .. }) = slot else {
        return;
    };

    tracing::trace!(%key, "quiet period elapsed, running job");
    let outcome = job.await;
    if tx.send(outcome).is_err() {
        tracing::debug!(%key, "caller stopped waiting for debounced job");
    }
}

/// Handle to a scheduled call. Resolves once the job ran or was superseded.
#[must_use = "a scheduled call settles through this handle"]
pub struct Scheduled<T> {
    key: String,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Scheduled<T> {
    /// Key the call was scheduled under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Future for Scheduled<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            // A dropped sender means the job never reported back.
            received.unwrap_or_else(|_| {
                Err(RelayError::Superseded {
                    key: self.key.clone(),
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use lingo_relay_core::ErrorCode;
    use tokio::time::Instant;
    use tokio_test::assert_pending;

    use super::*;

    async fn counted(runs: Arc<AtomicU32>, value: u32) -> Outcome<u32> {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_last_job_once() {
        let queue = DebounceQueue::new(DEFAULT_QUIET_PERIOD);
        let runs = Arc::new(AtomicU32::new(0));

        let c1 = queue.schedule("gen", counted(Arc::clone(&runs), 1));
        let c2 = queue.schedule("gen", counted(Arc::clone(&runs), 2));
        let c3 = queue.schedule("gen", counted(Arc::clone(&runs), 3));

        assert_eq!(c1.await.unwrap_err().code(), ErrorCode::Superseded);
        assert_eq!(c2.await.unwrap_err().code(), ErrorCode::Superseded);
        assert_eq!(c3.await.unwrap(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_quiet_period() {
        let queue = DebounceQueue::new(Duration::from_millis(400));
        let runs = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let mut call = queue.schedule("k", counted(Arc::clone(&runs), 7));
        assert_pending!(futures::poll!(&mut call));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_keys(), vec!["k".to_string()]);

        assert_eq!(call.await.unwrap(), 7);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let queue = DebounceQueue::default();
        let runs = Arc::new(AtomicU32::new(0));

        let a = queue.schedule("a", counted(Arc::clone(&runs), 1));
        let b = queue.schedule("b", counted(Arc::clone(&runs), 2));

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_job_is_not_superseded() {
        let queue = DebounceQueue::new(Duration::from_millis(100));

        let first = queue.schedule("k", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok("first")
        });
        // Past the quiet period: the first job is now running.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(queue.is_empty());

        let second = queue.schedule("k", async { Ok("second") });
        assert_eq!(queue.len(), 1);

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), "first");
        assert_eq!(second.unwrap(), "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_zero_quiet_period_settles_every_caller() {
        let queue = DebounceQueue::new(Duration::ZERO);

        for i in 0..500_u32 {
            let call = queue.schedule(format!("key-{i}"), async move { Ok(i) });
            let settled = tokio::time::timeout(Duration::from_secs(5), call)
                .await
                .expect("debounced call never settled");
            assert_eq!(settled.unwrap(), i);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_error_reaches_current_caller() {
        let queue = DebounceQueue::<u32>::default();
        let call = queue.schedule("k", async { Err(RelayError::validation("no words")) });
        assert_eq!(call.await.unwrap_err().code(), ErrorCode::ValidationError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_rejects_waiting_callers() {
        let queue = DebounceQueue::default();
        let runs = Arc::new(AtomicU32::new(0));

        let a = queue.schedule("a", counted(Arc::clone(&runs), 1));
        let b = queue.schedule("b", counted(Arc::clone(&runs), 2));
        assert_eq!(queue.cancel_all(), 2);

        assert_eq!(a.await.unwrap_err().code(), ErrorCode::Superseded);
        assert_eq!(b.await.unwrap_err().code(), ErrorCode::Superseded);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
