//! Short-lived exemption for apps the user has just unlocked.
//!
//! Entries live only in memory, so a restart re-prompts everything. Expiry is
//! measured on a monotonic clock: an entry may disappear early (one extra
//! prompt) but never outlive its deadline.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

pub struct GraceCache {
    entries: Mutex<HashMap<String, Instant>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl GraceCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(MonotonicClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert or refresh `package_id` with `expiry = now + ttl`. A ttl too
    /// large for the clock grants nothing.
    pub fn mark_unlocked(&self, package_id: &str, ttl: Duration) {
        let Some(expiry) = self.clock.now().checked_add(ttl) else {
            warn!(package = %package_id, "grace ttl out of range, not granting grace");
            return;
        };
        self.entries.lock().insert(package_id.to_string(), expiry);
        debug!(package = %package_id, ttl_ms = ttl.as_millis() as u64, "grace granted");
    }

    pub fn mark_unlocked_default(&self, package_id: &str) {
        self.mark_unlocked(package_id, self.default_ttl);
    }

    /// True iff an entry exists and has not reached its expiry. An expired
    /// entry is evicted on the way out.
    pub fn contains(&self, package_id: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(package_id).map(|expiry| now < *expiry) {
            Some(true) => true,
            Some(false) => {
                entries.remove(package_id);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, package_id: &str) -> bool {
        self.entries.lock().remove(package_id).is_some()
    }

    /// Drop every expired entry; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| now < *expiry);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Control handle for the sweeper task.
pub struct SweeperHandle {
    /// Wake the sweeper for an immediate pass.
    pub wake: Arc<Notify>,
    /// Send `true` to stop it.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Periodically evict expired grace entries. Lookups already evict lazily;
/// this only bounds memory for apps that are never looked up again.
pub fn spawn_sweeper(
    cache: Arc<GraceCache>,
    interval: Duration,
) -> (tokio::task::JoinHandle<()>, SweeperHandle) {
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let wake_clone = wake.clone();

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "grace sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_clone.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("grace sweeper shutting down");
                        return;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                return;
            }
            let evicted = cache.sweep();
            if evicted > 0 {
                debug!(evicted, "grace sweep");
            }
        }
    });

    (handle, SweeperHandle { wake, shutdown_tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (GraceCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            GraceCache::with_clock(Duration::from_secs(5), clock.clone()),
            clock,
        )
    }

    #[test]
    fn expires_after_ttl() {
        let (cache, clock) = cache();
        cache.mark_unlocked("com.bank", Duration::from_secs(5));
        assert!(cache.contains("com.bank"));
        clock.advance(Duration::from_millis(4999));
        assert!(cache.contains("com.bank"));
        clock.advance(Duration::from_millis(1));
        assert!(!cache.contains("com.bank"));
        assert!(cache.is_empty());
    }

    #[test]
    fn refresh_extends_expiry() {
        let (cache, clock) = cache();
        cache.mark_unlocked_default("a");
        clock.advance(Duration::from_secs(4));
        cache.mark_unlocked_default("a");
        clock.advance(Duration::from_secs(4));
        assert!(cache.contains("a"));
    }

    #[test]
    fn overflowing_ttl_grants_nothing() {
        let (cache, _) = cache();
        cache.mark_unlocked("com.bank", Duration::MAX);
        assert!(!cache.contains("com.bank"));
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_drops_only_expired() {
        let (cache, clock) = cache();
        cache.mark_unlocked("short", Duration::from_secs(1));
        cache.mark_unlocked("long", Duration::from_secs(60));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("long"));
        assert!(cache.revoke("long"));
        assert!(!cache.contains("long"));
    }

    #[tokio::test]
    async fn sweeper_runs_on_wake_and_stops() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(GraceCache::with_clock(Duration::from_secs(1), clock.clone()));
        cache.mark_unlocked_default("a");
        clock.advance(Duration::from_secs(2));

        let (task, handle) = spawn_sweeper(cache.clone(), Duration::from_secs(3600));
        handle.wake.notify_one();
        for _ in 0..50 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.is_empty());
        handle.shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
