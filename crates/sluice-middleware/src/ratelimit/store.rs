//! Per-key counter storage for fixed-window rate limiting.
//!
//! Each key owns its own lock; requests under different keys never contend
//! on a shared mutex. The map itself is a sharded [`DashMap`] that is held
//! only long enough to look up or insert the key's entry.

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Acquisitions between two lazy sweeps.
const SWEEP_EVERY: u64 = 1024;

/// Identifies one counter: a client under one rule.
///
/// The period is part of the key so two rules on the same endpoint with
/// different windows count independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Rate-limit identity of the client.
    pub identity: String,
    /// Endpoint pattern of the rule.
    pub endpoint: String,
    /// Window length of the rule.
    pub period: Duration,
}

impl CounterKey {
    /// Creates a key.
    pub fn new(identity: impl Into<String>, endpoint: impl Into<String>, period: Duration) -> Self {
        Self {
            identity: identity.into(),
            endpoint: endpoint.into(),
            period,
        }
    }
}

/// State of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests admitted in the current window.
    pub count: u64,
    /// When the current window opened.
    pub window_start: Instant,
}

impl CounterEntry {
    /// Creates an empty window opening at `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Opens a fresh window if the current one has expired.
    pub fn roll(&mut self, now: Instant, period: Duration) {
        if now.saturating_duration_since(self.window_start) >= period {
            *self = Self::new(now);
        }
    }
}

/// Errors from a counter store.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// The backing store could not be reached.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Exclusive access to one key's counter.
///
/// The key's lock is held until the lease is released or dropped, including
/// when the holder returns early or its future is cancelled.
pub struct CounterLease {
    guard: ArcMutexGuard<RawMutex, CounterEntry>,
}

impl CounterLease {
    /// Releases the key's lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for CounterLease {
    type Target = CounterEntry;

    fn deref(&self) -> &CounterEntry {
        &self.guard
    }
}

impl DerefMut for CounterLease {
    fn deref_mut(&mut self) -> &mut CounterEntry {
        &mut self.guard
    }
}

impl std::fmt::Debug for CounterLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CounterLease").field(&*self.guard).finish()
    }
}

/// Storage for rate-limit counters.
///
/// Implementations must lock per key: a lease on one key must not block
/// acquisition of another.
pub trait CounterStore: Send + Sync + 'static {
    /// Returns the locked entry for `key`, creating an empty window at `now`
    /// if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError`] if the store cannot be reached.
    fn acquire(&self, key: &CounterKey, now: Instant) -> Result<CounterLease, CounterStoreError>;
}

type Slot = Arc<Mutex<CounterEntry>>;

/// In-process counter store.
///
/// Entries idle for `eviction_multiplier` periods are removed by a lazy
/// sweep every few thousand acquisitions, or by calling
/// [`sweep`](Self::sweep) from a background task.
#[derive(Debug)]
pub struct MemoryCounterStore {
    entries: DashMap<CounterKey, Slot>,
    eviction_multiplier: u32,
    acquisitions: AtomicU64,
}

impl MemoryCounterStore {
    /// Creates an empty store evicting entries idle for two periods.
    #[must_use]
    pub fn new() -> Self {
        Self::with_eviction_multiplier(2)
    }

    /// Creates an empty store with a custom eviction horizon.
    #[must_use]
    pub fn with_eviction_multiplier(eviction_multiplier: u32) -> Self {
        Self {
            entries: DashMap::new(),
            eviction_multiplier: eviction_multiplier.max(1),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes entries whose window opened at least `eviction_multiplier`
    /// periods before `now`. Entries currently leased are kept.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let multiplier = self.eviction_multiplier;

        self.entries.retain(|key, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Some(entry) = slot.try_lock() else {
                return true;
            };
            let horizon = key.period.saturating_mul(multiplier);
            now.saturating_duration_since(entry.window_start) < horizon
        });

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "swept idle rate-limit counters");
        }
        removed
    }

    fn slot(&self, key: &CounterKey, now: Instant) -> Slot {
        if let Some(slot) = self.entries.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(CounterEntry::new(now))))
                .value(),
        )
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryCounterStore {
    fn acquire(&self, key: &CounterKey, now: Instant) -> Result<CounterLease, CounterStoreError> {
        if self.acquisitions.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }

        // The map shard guard is gone before the key lock is taken.
        let slot = self.slot(key, now);
        Ok(CounterLease {
            guard: slot.lock_arc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn key(identity: &str) -> CounterKey {
        CounterKey::new(identity, "*", Duration::from_secs(1))
    }

    #[test]
    fn test_acquire_creates_empty_entry() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();

        let lease = store.acquire(&key("a"), now).unwrap();
        assert_eq!(lease.count, 0);
        assert_eq!(lease.window_start, now);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_updates_persist_across_leases() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();

        let mut lease = store.acquire(&key("a"), now).unwrap();
        lease.count += 3;
        lease.release();

        let lease = store.acquire(&key("a"), now).unwrap();
        assert_eq!(lease.count, 3);
    }

    #[test]
    fn test_periods_are_distinct_keys() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();

        let mut short = store
            .acquire(&CounterKey::new("a", "/x", Duration::from_secs(1)), now)
            .unwrap();
        short.count = 5;
        drop(short);

        let long = store
            .acquire(&CounterKey::new("a", "/x", Duration::from_secs(60)), now)
            .unwrap();
        assert_eq!(long.count, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_roll_resets_expired_window() {
        let start = Instant::now();
        let mut entry = CounterEntry { count: 4, window_start: start };

        entry.roll(start + Duration::from_millis(999), Duration::from_secs(1));
        assert_eq!(entry.count, 4);

        let later = start + Duration::from_secs(1);
        entry.roll(later, Duration::from_secs(1));
        assert_eq!(entry, CounterEntry::new(later));
    }

    #[test]
    fn test_other_keys_progress_while_one_is_leased() {
        let store = Arc::new(MemoryCounterStore::new());
        let now = Instant::now();
        let held = store.acquire(&key("held"), now).unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..32 {
                    let mut lease = store.acquire(&key(&format!("other-{i}")), now).unwrap();
                    lease.count += 1;
                }
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("other keys were blocked by a held lease");
        worker.join().unwrap();
        drop(held);
        assert_eq!(store.len(), 33);
    }

    #[test]
    fn test_sweep_evicts_idle_entries_only() {
        let store = MemoryCounterStore::with_eviction_multiplier(2);
        let start = Instant::now();

        store.acquire(&key("old"), start).unwrap().release();
        let later = start + Duration::from_secs(2);
        store.acquire(&key("fresh"), later).unwrap().release();
        let _held = store.acquire(&key("leased"), start).unwrap();

        assert_eq!(store.sweep(later), 1);
        assert_eq!(store.len(), 2);
    }
}
