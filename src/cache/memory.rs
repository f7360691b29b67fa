//! In-process tier.
//!
//! Two strategies behind one type, picked when the cache is built:
//! - [`BoundedStrongTier`]: byte-budgeted LRU holding every entry strongly
//! - [`OpportunisticTier`]: entries are held weakly and may disappear at any
//!   time between a `put` and a later `get`
//!
//! Both are safe to share between threads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Cached values are shared, immutable strings.
pub type Value = Arc<str>;

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// Which memory strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStrategy {
    /// Strong references, least-recently-used eviction.
    BoundedStrong,
    /// Weak references; entries are reclaimable at any time.
    Opportunistic,
}

impl std::fmt::Display for MemoryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryStrategy::BoundedStrong => write!(f, "bounded-strong"),
            MemoryStrategy::Opportunistic => write!(f, "opportunistic"),
        }
    }
}

struct BoundedInner {
    entries: LruCache<String, Value>,
    bytes: usize,
}

/// LRU cache bounded by the total size of keys and values.
pub struct BoundedStrongTier {
    inner: Mutex<BoundedInner>,
    budget: usize,
}

impl BoundedStrongTier {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedInner {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            budget,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert, evicting least recently used entries past the budget. A value
    /// too large for the whole budget is not cached and displaces any older
    /// value for the same key.
    pub fn put(&self, key: &str, value: Value) {
        let size = entry_size(key, &value);
        let mut inner = self.inner.lock();

        if size > self.budget {
            if let Some(old) = inner.entries.pop(key) {
                inner.bytes -= entry_size(key, &old);
            }
            return;
        }

        if let Some(old) = inner.entries.put(key.to_string(), value) {
            inner.bytes -= entry_size(key, &old);
        }
        inner.bytes += size;

        while inner.bytes > self.budget {
            match inner.entries.pop_lru() {
                Some((k, v)) => inner.bytes -= entry_size(&k, &v),
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let old = inner.entries.pop(key)?;
        inner.bytes -= entry_size(key, &old);
        Some(old)
    }

    pub fn evict_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        self.inner.lock().bytes
    }
}

struct OpportunisticInner {
    entries: HashMap<String, Weak<str>>,
    /// Strong references to the most recent puts, oldest first.
    retained: VecDeque<(usize, Value)>,
    retained_bytes: usize,
}

impl OpportunisticInner {
    fn purge_dead(&mut self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }
}

/// Weakly held cache.
///
/// Recent puts are kept alive by a FIFO of strong references bounded by the
/// byte budget. Once an entry falls out of that window, or [`reclaim`] is
/// called, it survives only while a caller still holds the value returned by a
/// previous `get`. Callers must treat every entry as possibly gone.
///
/// [`reclaim`]: OpportunisticTier::reclaim
pub struct OpportunisticTier {
    inner: Mutex<OpportunisticInner>,
    budget: usize,
}

impl OpportunisticTier {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(OpportunisticInner {
                entries: HashMap::new(),
                retained: VecDeque::new(),
                retained_bytes: 0,
            }),
            budget,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key)?.upgrade();
        if value.is_none() {
            inner.entries.remove(key);
        }
        value
    }

    pub fn put(&self, key: &str, value: Value) {
        let size = entry_size(key, &value);
        let mut inner = self.inner.lock();

        inner.entries.insert(key.to_string(), Arc::downgrade(&value));
        inner.retained.push_back((size, value));
        inner.retained_bytes += size;

        while inner.retained_bytes > self.budget {
            match inner.retained.pop_front() {
                Some((size, _)) => inner.retained_bytes -= size,
                None => break,
            }
        }

        if inner.entries.len() > 2 * inner.retained.len() + 64 {
            inner.purge_dead();
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let value = inner.entries.remove(key)?.upgrade()?;

        let mut released = 0;
        inner.retained.retain(|(size, held)| {
            let keep = !Arc::ptr_eq(held, &value);
            if !keep {
                released += *size;
            }
            keep
        });
        inner.retained_bytes -= released;
        Some(value)
    }

    pub fn evict_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.retained.clear();
        inner.retained_bytes = 0;
    }

    /// Drop every strong reference held by the tier.
    pub fn reclaim(&self) {
        let mut inner = self.inner.lock();
        inner.retained.clear();
        inner.retained_bytes = 0;
        inner.purge_dead();
    }

    /// Entries that can still be upgraded.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes pinned by the tier's own strong references.
    pub fn bytes_used(&self) -> usize {
        self.inner.lock().retained_bytes
    }
}

/// The memory tier, fixed to one strategy for its lifetime.
pub enum MemoryTier {
    Bounded(BoundedStrongTier),
    Opportunistic(OpportunisticTier),
}

impl MemoryTier {
    pub fn new(strategy: MemoryStrategy, budget: usize) -> Self {
        match strategy {
            MemoryStrategy::BoundedStrong => MemoryTier::Bounded(BoundedStrongTier::new(budget)),
            MemoryStrategy::Opportunistic => {
                MemoryTier::Opportunistic(OpportunisticTier::new(budget))
            }
        }
    }

    pub fn strategy(&self) -> MemoryStrategy {
        match self {
            MemoryTier::Bounded(_) => MemoryStrategy::BoundedStrong,
            MemoryTier::Opportunistic(_) => MemoryStrategy::Opportunistic,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            MemoryTier::Bounded(tier) => tier.get(key),
            MemoryTier::Opportunistic(tier) => tier.get(key),
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        match self {
            MemoryTier::Bounded(tier) => tier.put(key, value),
            MemoryTier::Opportunistic(tier) => tier.put(key, value),
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        match self {
            MemoryTier::Bounded(tier) => tier.remove(key),
            MemoryTier::Opportunistic(tier) => tier.remove(key),
        }
    }

    pub fn evict_all(&self) {
        match self {
            MemoryTier::Bounded(tier) => tier.evict_all(),
            MemoryTier::Opportunistic(tier) => tier.evict_all(),
        }
    }

    /// Respond to memory pressure. Only the opportunistic tier gives anything back.
    pub fn reclaim(&self) {
        if let MemoryTier::Opportunistic(tier) = self {
            tier.reclaim();
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MemoryTier::Bounded(tier) => tier.len(),
            MemoryTier::Opportunistic(tier) => tier.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        match self {
            MemoryTier::Bounded(tier) => tier.bytes_used(),
            MemoryTier::Opportunistic(tier) => tier.bytes_used(),
        }
    }
}
