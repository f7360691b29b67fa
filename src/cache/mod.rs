//! Two-tier cache.
//!
//! - [`key`]: composite keys and their 64-bit hashes
//! - [`clock`]: timestamp sources for stamping and expiry
//! - [`memory`]: in-process tier (bounded LRU or opportunistic)
//! - [`coordinator`]: write-through / read-through cache over both tiers

pub mod clock;
pub mod coordinator;
pub mod key;
pub mod memory;
