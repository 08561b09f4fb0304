//! Wrappers that tame bursty calls to downstream services.
//!
//! Provides:
//! - `DebounceQueue` - Coalesces rapid calls per key, superseding older ones
//! - `TtlCache` - Memoizes fallible async operations with expiry
//! - `RetryPolicy` - Bounded retries around a fallible operation

pub mod cache;
pub mod debounce;
pub mod retry;
pub mod stats;

pub use cache::{DEFAULT_CAPACITY, DEFAULT_TTL, ExecuteOptions, TtlCache};
pub use debounce::{DEFAULT_QUIET_PERIOD, DebounceQueue, Scheduled};
pub use retry::RetryPolicy;
pub use stats::CacheStats;
