//! Runtime configuration for tiered-blob-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every section has defaults, so a config file only needs the fields it changes.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::memory::MemoryStrategy;
use crate::storage::buffer_pool::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_DEPTH};

/// Smallest accepted fraction of process memory for the memory tier.
pub const MIN_MEMORY_PERCENT: f32 = 0.05;

/// Largest accepted fraction of process memory for the memory tier.
pub const MAX_MEMORY_PERCENT: f32 = 0.8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("memory percent must be between 0.05 and 0.8 (inclusive), got {0}")]
    MemoryPercentOutOfRange(f32),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiered-blob-cache", about = "Two-tier string cache backed by a disk blob store")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "cache.json")]
    pub config: PathBuf,

    /// Override the disk tier directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Store a value.
    Put { key: String, value: String },

    /// Read a value.
    Get {
        key: String,

        /// Freshness window in minutes (defaults to the configured window).
        #[arg(long)]
        max_age: Option<u64>,
    },

    /// Remove a value.
    Remove { key: String },

    /// Remove every value.
    Clear,

    /// Print disk tier statistics as JSON.
    Stats,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Memory tier settings.
    pub memory: MemoryConfig,

    /// Disk tier settings.
    pub disk: DiskConfig,

    /// Read buffer pool settings.
    pub buffers: BufferConfig,

    /// Freshness window applied by reads that don't pass their own, in minutes.
    pub default_max_age_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            buffers: BufferConfig::default(),
            default_max_age_minutes: 60 * 24 * 15, // 15 days
        }
    }
}

/// Memory tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Keep a memory tier at all.
    pub enabled: bool,

    /// Budget for keys plus values, in bytes.
    pub max_bytes: usize,

    /// Hold entries weakly so they can be reclaimed at any time.
    pub recycle_immediately: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 3 * 1024 * 1024, // 3 MB
            recycle_immediately: true,
        }
    }
}

impl MemoryConfig {
    pub fn strategy(&self) -> MemoryStrategy {
        if self.recycle_immediately {
            MemoryStrategy::Opportunistic
        } else {
            MemoryStrategy::BoundedStrong
        }
    }

    /// Size the memory tier as a fraction of `available_bytes`.
    ///
    /// `percent` must lie in `[0.05, 0.8]`; it is never clamped.
    pub fn set_size_percent(
        &mut self,
        percent: f32,
        available_bytes: u64,
    ) -> Result<(), ConfigError> {
        if !(MIN_MEMORY_PERCENT..=MAX_MEMORY_PERCENT).contains(&percent) {
            return Err(ConfigError::MemoryPercentOutOfRange(percent));
        }
        self.max_bytes = (f64::from(percent) * available_bytes as f64).round() as usize;
        Ok(())
    }
}

/// Disk tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Keep a disk tier at all.
    pub enabled: bool,

    /// Directory holding the store files. Created if missing.
    pub path: PathBuf,

    /// Live byte budget, record headers included.
    pub max_bytes: u64,

    /// Maximum number of records, removal markers included.
    pub max_count: usize,

    /// Discard existing content when opening.
    pub truncate_on_open: bool,

    /// Qualifies every key, so several caches can share a directory layout
    /// without their keys meeting.
    pub namespace: Option<String>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: std::env::temp_dir().join("tiered-blob-cache"),
            max_bytes: 50 * 1024 * 1024, // 50 MB
            max_count: 50_000,
            truncate_on_open: false,
            namespace: None,
        }
    }
}

/// Read buffer pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Idle buffers kept for reuse.
    pub pool_depth: usize,

    /// Minimum size of each buffer in bytes.
    pub buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pool_depth: DEFAULT_POOL_DEPTH,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Config =
                serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Reject budgets that would make a tier useless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.enabled && self.memory.max_bytes == 0 {
            return Err(ConfigError::Zero("memory.max_bytes"));
        }
        if self.disk.enabled {
            if self.disk.max_bytes == 0 {
                return Err(ConfigError::Zero("disk.max_bytes"));
            }
            if self.disk.max_count == 0 {
                return Err(ConfigError::Zero("disk.max_count"));
            }
        }
        if self.default_max_age_minutes == 0 {
            return Err(ConfigError::Zero("default_max_age_minutes"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.memory.max_bytes, 3 * 1024 * 1024);
        assert_eq!(cfg.disk.max_count, 50_000);
        assert_eq!(cfg.default_max_age_minutes, 21_600);
        assert_eq!(cfg.memory.strategy(), MemoryStrategy::Opportunistic);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_memory_percent_range() {
        let mut memory = MemoryConfig::default();
        memory.set_size_percent(0.5, 1000).unwrap();
        assert_eq!(memory.max_bytes, 500);

        assert!(matches!(
            memory.set_size_percent(0.01, 1000),
            Err(ConfigError::MemoryPercentOutOfRange(_))
        ));
        assert!(memory.set_size_percent(0.9, 1000).is_err());
        assert_eq!(memory.max_bytes, 500);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut cfg = Config::default();
        cfg.disk.max_count = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero("disk.max_count"))));

        cfg.disk.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, r#"{ "memory": { "recycle_immediately": false } }"#).unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.memory.strategy(), MemoryStrategy::BoundedStrong);
        assert_eq!(cfg.memory.max_bytes, 3 * 1024 * 1024);
        assert_eq!(cfg.disk.max_count, 50_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/cache.json")).unwrap();
        assert_eq!(cfg.buffers.pool_depth, DEFAULT_POOL_DEPTH);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
