//! tiered-blob-cache: a two-tier string cache.
//!
//! Hot entries live in memory; everything is written through to a disk blob
//! store that survives restarts, bounds itself by record count and bytes, and
//! repairs itself instead of failing when its files are damaged. Each value is
//! stamped with its write time and judged fresh or stale per read.

pub mod cache;
pub mod config;
pub mod context;
pub mod storage;

pub use cache::clock::{Clock, ManualClock, SystemClock};
pub use cache::coordinator::{CacheStatsSnapshot, TieredCache};
pub use cache::memory::MemoryStrategy;
pub use config::{Config, ConfigError};
pub use context::CacheContext;
