//! Application-owned cache handle.
//!
//! A [`CacheContext`] is built once from a [`Config`] and passed to whoever
//! needs the cache. There is no global instance. `reset` swaps in a fresh,
//! empty cache while holding off every other call.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::coordinator::{CacheStatsSnapshot, TieredCache};
use crate::config::{Config, ConfigError};
use crate::storage::StoreStats;

pub struct CacheContext {
    config: Config,
    clock: Arc<dyn Clock>,
    cache: RwLock<TieredCache>,
}

impl CacheContext {
    /// Validate `config` and open the cache. Disk problems do not fail this
    /// call; the cache runs without its disk tier instead.
    pub fn open(config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = TieredCache::with_clock(&config, clock.clone());
        Ok(Self {
            config,
            clock,
            cache: RwLock::new(cache),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn put(&self, key: &str, value: &str) {
        self.cache.read().put(key, value);
    }

    /// Read with the configured default freshness window.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_with_max_age(key, self.config.default_max_age_minutes)
    }

    pub fn get_with_max_age(&self, key: &str, max_age_minutes: u64) -> Option<String> {
        self.cache.read().get(key, max_age_minutes)
    }

    pub fn remove(&self, key: &str) {
        self.cache.read().remove(key);
    }

    pub fn clear(&self) {
        self.cache.read().clear();
    }

    pub fn close(&self) {
        self.cache.read().close();
    }

    pub fn flush(&self) {
        self.cache.read().flush();
    }

    pub fn reclaim_memory(&self) {
        self.cache.read().reclaim_memory();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.read().stats()
    }

    pub fn store_stats(&self) -> Option<StoreStats> {
        self.cache.read().store_stats()
    }

    /// Wipe everything and reopen. Blocks other calls until the old cache is
    /// closed and the new one is open.
    pub fn reset(&self) {
        let mut cache = self.cache.write();
        cache.clear();
        cache.close();
        // A closed cache skips `clear`, so the replacement truncates the store itself.
        let mut fresh = self.config.clone();
        fresh.disk.truncate_on_open = true;
        *cache = TieredCache::with_clock(&fresh, self.clock.clone());
        info!("Cache reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.disk.path = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.memory.max_bytes = 0;
        assert!(CacheContext::open(cfg).is_err());
    }

    #[test]
    fn test_reset_empties_and_reopens() {
        let tmp = TempDir::new().unwrap();
        let ctx = CacheContext::open(config(&tmp)).unwrap();

        ctx.put("a", "1");
        assert_eq!(ctx.get("a").as_deref(), Some("1"));

        ctx.reset();
        assert_eq!(ctx.get("a"), None);

        ctx.put("b", "2");
        assert_eq!(ctx.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_reset_after_close_reopens() {
        let tmp = TempDir::new().unwrap();
        let ctx = CacheContext::open(config(&tmp)).unwrap();
        ctx.close();
        ctx.put("a", "1");
        assert_eq!(ctx.get("a"), None);

        ctx.reset();
        ctx.put("a", "1");
        assert_eq!(ctx.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_reset_after_close_discards_data() {
        let tmp = TempDir::new().unwrap();
        let ctx = CacheContext::open(config(&tmp)).unwrap();
        ctx.put("a", "1");
        ctx.close();

        ctx.reset();
        assert_eq!(ctx.get("a"), None);
        assert_eq!(ctx.store_stats().unwrap().records, 0);
    }
}
