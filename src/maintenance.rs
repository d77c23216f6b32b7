//! Background maintenance for the expiring cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{ExpiringCache, KeyValueStore};
use crate::clock::Clock;

/// Run `clear_expired` every `every` until `shutdown` resolves.
///
/// Returns the total number of entries removed.
pub async fn run_sweeper<S, C, F>(cache: Arc<ExpiringCache<S, C>>, every: Duration, shutdown: F) -> usize
where
    S: KeyValueStore,
    C: Clock,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut total = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.clear_expired();
                total += removed;
                debug!(removed, total, "Sweep finished");
            }
            _ = &mut shutdown => {
                info!(total, "Sweeper stopping");
                return total;
            }
        }
    }
}

/// Handle to a sweeper running on the tokio runtime.
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<usize>,
}

impl Sweeper {
    /// Spawn a sweeper for `cache`.
    pub fn spawn<S, C>(cache: Arc<ExpiringCache<S, C>>, every: Duration) -> Self
    where
        S: KeyValueStore + 'static,
        C: Clock + 'static,
    {
        let (stop, stopped) = oneshot::channel::<()>();
        info!(interval_ms = every.as_millis() as u64, "Starting cache sweeper");

        let task = tokio::spawn(run_sweeper(cache, every, async move {
            // A dropped sender also stops the sweeper.
            let _ = stopped.await;
        }));

        Self {
            stop: Some(stop),
            task,
        }
    }

    /// Stop the sweeper and return how many entries it removed.
    pub async fn stop(mut self) -> usize {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let cache = Arc::new(ExpiringCache::with_clock(Arc::clone(&store), clock.clone()));

        cache.set("short", &1, Some(Duration::from_millis(10)));
        cache.set("forever", &2, None);
        clock.advance(Duration::from_millis(20));

        let sweeper = Sweeper::spawn(Arc::clone(&cache), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let removed = sweeper.stop().await;

        assert_eq!(removed, 1);
        assert_eq!(store.keys(), vec!["forever".to_string()]);
    }

    #[tokio::test]
    async fn test_run_sweeper_stops_on_shutdown() {
        let cache = Arc::new(ExpiringCache::with_clock(MemoryStore::new(), ManualClock::new(0)));

        let removed = run_sweeper(cache, Duration::from_secs(3600), async {}).await;
        assert_eq!(removed, 0);
    }
}
