//! Expiring key-value cache over a capacity-constrained store.

mod app;
mod entry;
mod expiring;
mod metrics;
mod store;

pub use app::{AppCache, CacheTier, ConnectionQuality, Namespace};
pub use entry::{CacheEntry, RawEntry, StoredState};
pub use expiring::{CacheLookup, CacheReport, ExpiringCache, WriteOutcome};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, DEFAULT_CAPACITY_BYTES};
