//! Persistent tier.
//!
//! - [`blob_store`]: file-backed key → blob engine with count/byte ceilings
//! - [`buffer_pool`]: reusable read buffers for lookups
//! - [`record`]: on-disk record and index snapshot layouts

pub mod blob_store;
pub mod buffer_pool;
pub mod record;

pub use blob_store::{BlobStore, StoreError, StoreStats};
pub use buffer_pool::{BufferPool, BytesBuffer, PooledBuffer};
