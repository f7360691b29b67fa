//! The two-tier cache: memory in front of the blob store.
//!
//! Writes go to both tiers. Reads try memory, then disk through a pooled
//! buffer. Every stored value carries its write time (`<millis>#@@#<value>`),
//! and freshness is judged per read against a caller-supplied window; anything
//! stale or unparsable is deleted from both tiers on the spot.
//!
//! Storage failures never reach the caller. They are logged, counted, and
//! turned into a miss or a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::key::{is_same_key, KeyCodec};
use crate::cache::memory::{MemoryTier, Value};
use crate::config::Config;
use crate::storage::{BlobStore, BufferPool, StoreError, StoreStats};

/// Separates the write timestamp from the value. Cannot occur in a decimal number.
pub const TIME_SEPARATOR: &str = "#@@#";

const MILLIS_PER_MINUTE: u64 = 60 * 1000;

/// Prefix `value` with its write time.
pub fn stamp(now_millis: u64, value: &str) -> String {
    format!("{now_millis}{TIME_SEPARATOR}{value}")
}

/// Split a stamped value into `(write_millis, value)`. `None` if malformed.
pub fn unstamp(stamped: &str) -> Option<(u64, &str)> {
    let (millis, value) = stamped.split_once(TIME_SEPARATOR)?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((millis.parse().ok()?, value))
}

/// Whether a value written at `stamp` is still fresh at `now` for a window of
/// `max_age_minutes`. A stamp from the future is never fresh.
pub fn is_fresh(now_millis: u64, stamp_millis: u64, max_age_minutes: u64) -> bool {
    match now_millis.checked_sub(stamp_millis) {
        Some(age) => u128::from(age) < u128::from(max_age_minutes) * u128::from(MILLIS_PER_MINUTE),
        None => false,
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    collisions: AtomicU64,
    storage_errors: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub collisions: u64,
    pub storage_errors: u64,
}

/// Result of looking a key up in either tier, before freshness is applied.
enum Found {
    Miss,
    Stamped(Value),
    Malformed,
}

struct DiskState {
    store: Option<BlobStore>,
    closed: bool,
}

/// Memory + disk cache with per-read freshness windows.
///
/// Every operation runs inside one critical section, so a reader never sees a
/// half-applied write.
pub struct TieredCache {
    memory: Option<MemoryTier>,
    disk: Mutex<DiskState>,
    pool: BufferPool,
    codec: KeyCodec,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl TieredCache {
    /// Build a cache on the system clock.
    pub fn open(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let codec = KeyCodec::new(config.disk.namespace.clone());
        Self::with_parts(config, clock, codec)
    }

    /// Build a cache from explicit parts. A disk tier that cannot be opened is
    /// logged and left out; the cache keeps working without it.
    pub fn with_parts(config: &Config, clock: Arc<dyn Clock>, codec: KeyCodec) -> Self {
        let memory = config
            .memory
            .enabled
            .then(|| MemoryTier::new(config.memory.strategy(), config.memory.max_bytes));

        let store = if config.disk.enabled {
            match BlobStore::open(
                &config.disk.path,
                config.disk.max_count,
                config.disk.max_bytes,
                config.disk.truncate_on_open,
            ) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(
                        path = %config.disk.path.display(),
                        error = %e,
                        "Disk tier unavailable, continuing without it"
                    );
                    None
                }
            }
        } else {
            None
        };

        info!(
            memory = ?memory.as_ref().map(MemoryTier::strategy),
            disk = store.is_some(),
            "Cache ready"
        );

        Self {
            memory,
            disk: Mutex::new(DiskState {
                store,
                closed: false,
            }),
            pool: BufferPool::new(config.buffers.pool_depth, config.buffers.buffer_size),
            codec,
            clock,
            stats: CacheStats::default(),
        }
    }

    /// Store `value` under `key` in both tiers. Empty keys are ignored.
    pub fn put(&self, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        let mut disk = self.disk.lock();
        if disk.closed {
            return;
        }

        let stamped = stamp(self.clock.now_millis(), value);
        self.write_disk(&mut disk, key, stamped.as_bytes());
        if let Some(memory) = &self.memory {
            memory.put(key, Value::from(stamped));
        }
        debug!(key, len = value.len(), "Cached value");
    }

    /// The value for `key` if it was written less than `max_age_minutes` ago.
    ///
    /// An entry that is too old, stamped in the future, or unparsable is
    /// removed from both tiers and reported as absent.
    pub fn get(&self, key: &str, max_age_minutes: u64) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let mut disk = self.disk.lock();
        if disk.closed {
            return None;
        }

        let mut from_disk = false;
        let found = match self.memory.as_ref().and_then(|m| m.get(key)) {
            Some(stamped) => {
                self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
                Found::Stamped(stamped)
            }
            None => {
                from_disk = true;
                self.read_disk(&mut disk, key)
            }
        };

        let stamped = match found {
            Found::Miss => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Found::Malformed => None,
            Found::Stamped(stamped) => Some(stamped),
        };

        let now = self.clock.now_millis();
        if let Some(stamped) = stamped {
            if let Some((written, value)) = unstamp(&stamped) {
                if is_fresh(now, written, max_age_minutes) {
                    if from_disk {
                        self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                        if let Some(memory) = &self.memory {
                            memory.put(key, stamped.clone());
                        }
                    }
                    return Some(value.to_string());
                }
                debug!(
                    key,
                    age_ms = now.saturating_sub(written),
                    max_age_minutes,
                    "Entry expired"
                );
            } else {
                debug!(key, "Malformed stamped value");
            }
        }

        self.stats.expired.fetch_add(1, Ordering::Relaxed);
        self.evict_key(&mut disk, key);
        None
    }

    /// Drop `key` from both tiers.
    pub fn remove(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut disk = self.disk.lock();
        if disk.closed {
            return;
        }
        self.evict_key(&mut disk, key);
    }

    /// Drop everything from both tiers.
    pub fn clear(&self) {
        let mut disk = self.disk.lock();
        if disk.closed {
            return;
        }
        if let Some(memory) = &self.memory {
            memory.evict_all();
        }
        if let Some(store) = disk.store.as_mut() {
            if let Err(e) = store.delete_all() {
                self.storage_error("clear", &e);
            }
        }
        info!("Cache cleared");
    }

    /// Empty the memory tier and close the disk tier. Later calls are no-ops.
    pub fn close(&self) {
        let mut disk = self.disk.lock();
        if disk.closed {
            return;
        }
        if let Some(memory) = &self.memory {
            memory.evict_all();
        }
        if let Some(mut store) = disk.store.take() {
            if let Err(e) = store.close() {
                self.storage_error("close", &e);
            }
        }
        disk.closed = true;
        debug!("Cache closed");
    }

    /// Persist the disk index so the next open skips a full scan.
    pub fn flush(&self) {
        let mut disk = self.disk.lock();
        if let Some(store) = disk.store.as_mut() {
            if let Err(e) = store.flush() {
                self.storage_error("flush", &e);
            }
        }
    }

    /// Release memory held by an opportunistic memory tier.
    pub fn reclaim_memory(&self) {
        if let Some(memory) = &self.memory {
            memory.reclaim();
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            memory_hits: load(&self.stats.memory_hits),
            disk_hits: load(&self.stats.disk_hits),
            misses: load(&self.stats.misses),
            expired: load(&self.stats.expired),
            collisions: load(&self.stats.collisions),
            storage_errors: load(&self.stats.storage_errors),
        }
    }

    /// Disk tier counters, if the disk tier is open.
    pub fn store_stats(&self) -> Option<StoreStats> {
        self.disk.lock().store.as_ref().map(BlobStore::stats)
    }

    pub fn has_disk(&self) -> bool {
        self.disk.lock().store.is_some()
    }

    pub fn memory(&self) -> Option<&MemoryTier> {
        self.memory.as_ref()
    }

    fn evict_key(&self, disk: &mut DiskState, key: &str) {
        if let Some(memory) = &self.memory {
            memory.remove(key);
        }
        // The store has no point delete: an empty payload marks the key gone.
        self.write_disk(disk, key, &[]);
    }

    fn write_disk(&self, disk: &mut DiskState, key: &str, payload: &[u8]) {
        let Some(store) = disk.store.as_mut() else {
            return;
        };
        let (composite, hashed) = self.codec.derive(key);
        let mut body = Vec::with_capacity(composite.len() + payload.len());
        body.extend_from_slice(&composite);
        body.extend_from_slice(payload);

        if let Err(e) = store.insert(hashed, &body) {
            self.storage_error("insert", &e);
        }
    }

    fn read_disk(&self, disk: &mut DiskState, key: &str) -> Found {
        let Some(store) = disk.store.as_mut() else {
            return Found::Miss;
        };
        let (composite, hashed) = self.codec.derive(key);
        let mut buffer = self.pool.acquire();

        match store.lookup(hashed, &mut buffer) {
            Ok(true) => {}
            Ok(false) => return Found::Miss,
            Err(e) => {
                self.storage_error("lookup", &e);
                return Found::Miss;
            }
        }

        if !is_same_key(&composite, buffer.as_slice()) {
            // The slot belongs to another key with the same hash. Claim it with
            // this key's tombstone.
            self.stats.collisions.fetch_add(1, Ordering::Relaxed);
            warn!(key, hashed, "Hash collision on disk tier, evicting slot");
            drop(buffer);
            self.write_disk(disk, key, &[]);
            return Found::Miss;
        }

        buffer.offset = composite.len();
        buffer.length -= composite.len();
        if buffer.length == 0 {
            // Tombstone written by a previous removal.
            return Found::Miss;
        }

        match std::str::from_utf8(buffer.as_slice()) {
            Ok(text) => Found::Stamped(Value::from(text)),
            Err(_) => Found::Malformed,
        }
    }

    fn storage_error(&self, op: &'static str, error: &StoreError) {
        self.stats.storage_errors.fetch_add(1, Ordering::Relaxed);
        warn!(op, error = %error, "Disk tier error ignored");
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use tempfile::TempDir;

    fn disk_only(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.memory.enabled = false;
        config.disk.path = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_stamp_format() {
        assert_eq!(stamp(1234, "v"), "1234#@@#v");
        assert_eq!(unstamp("1234#@@#v"), Some((1234, "v")));
        assert_eq!(unstamp("1#@@#a#@@#b"), Some((1, "a#@@#b")));
        assert_eq!(unstamp("1234#@@#"), Some((1234, "")));
    }

    #[test]
    fn test_unstamp_rejects_malformed() {
        assert_eq!(unstamp("no separator"), None);
        assert_eq!(unstamp("#@@#value"), None);
        assert_eq!(unstamp("12a4#@@#value"), None);
        assert_eq!(unstamp("-5#@@#value"), None);
        assert_eq!(unstamp("99999999999999999999999#@@#value"), None);
    }

    #[test]
    fn test_freshness_window() {
        let minute = MILLIS_PER_MINUTE;
        assert!(is_fresh(1000, 1000, 1));
        assert!(is_fresh(minute - 1, 0, 1));
        assert!(!is_fresh(minute, 0, 1));
        assert!(!is_fresh(0, 1, 60));
        assert!(!is_fresh(5, 5, 0));
    }

    #[test]
    fn test_malformed_disk_record_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let config = disk_only(&tmp);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = TieredCache::with_clock(&config, clock);

        {
            let mut disk = cache.disk.lock();
            cache.write_disk(&mut disk, "k", b"not stamped");
        }

        assert_eq!(cache.get("k", 60), None);
        assert_eq!(cache.stats().expired, 1);

        // The record is now a tombstone: a plain miss, no further deletes.
        assert_eq!(cache.get("k", 60), None);
        assert_eq!(cache.stats().expired, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_non_utf8_disk_record_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let config = disk_only(&tmp);
        let cache = TieredCache::with_clock(&config, Arc::new(ManualClock::new(0)));

        {
            let mut disk = cache.disk.lock();
            cache.write_disk(&mut disk, "k", &[0xFF, 0xFE, 0x00]);
        }

        assert_eq!(cache.get("k", 60), None);
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_operations_after_close_are_noops() {
        let tmp = TempDir::new().unwrap();
        let config = disk_only(&tmp);
        let cache = TieredCache::with_clock(&config, Arc::new(ManualClock::new(0)));

        cache.close();
        cache.close();
        cache.put("k", "v");
        assert_eq!(cache.get("k", 60), None);
        assert!(!cache.has_disk());
    }
}
