//! Pool of reusable read buffers.
//!
//! Disk lookups copy record bodies into a caller-supplied [`BytesBuffer`]. Under
//! heavy read traffic, drawing those buffers from a small pool avoids allocating
//! a fresh `Vec` per lookup. Buffers only ever grow.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Default number of idle buffers kept by a pool.
pub const DEFAULT_POOL_DEPTH: usize = 5;

/// Default minimum buffer size (100 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 100 * 1024;

/// A growable byte buffer with a `(offset, length)` view over its valid region.
#[derive(Debug, Default)]
pub struct BytesBuffer {
    pub data: Vec<u8>,
    pub offset: usize,
    pub length: usize,
}

impl BytesBuffer {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            offset: 0,
            length: 0,
        }
    }

    /// Make sure at least `len` bytes are addressable. Never shrinks.
    pub fn ensure_len(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    /// Allocated size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The valid region.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// Reset the view, keeping the allocation.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.length = 0;
    }
}

/// Bounded pool of [`BytesBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesBuffer>>,
    depth: usize,
    buffer_size: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_DEPTH, DEFAULT_BUFFER_SIZE)
    }
}

impl BufferPool {
    /// `depth`: idle buffers kept. `buffer_size`: minimum size of handed-out buffers.
    pub fn new(depth: usize, buffer_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(depth)),
            depth,
            buffer_size,
        }
    }

    /// Take a buffer from the pool, allocating one if the pool is empty.
    ///
    /// The buffer goes back to the pool when the returned guard drops.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let reused = self.idle.lock().pop();
        let mut buffer = reused.unwrap_or_else(|| BytesBuffer::with_capacity(self.buffer_size));
        buffer.clear();
        PooledBuffer { pool: self, buffer }
    }

    /// Return a buffer. Dropped if the pool is already at depth.
    pub fn release(&self, mut buffer: BytesBuffer) {
        buffer.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.depth {
            idle.push(buffer);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// A buffer borrowed from a [`BufferPool`], released on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: BytesBuffer,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesBuffer;

    fn deref(&self) -> &BytesBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_minimum_size() {
        let pool = BufferPool::new(2, 64);
        let buf = pool.acquire();
        assert!(buf.capacity() >= 64);
        assert_eq!(buf.length, 0);
    }

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = BufferPool::new(2, 16);
        assert_eq!(pool.idle(), 0);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_release_beyond_depth_drops() {
        let pool = BufferPool::new(1, 16);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
            let _c = pool.acquire();
        }
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_grown_buffer_is_reused() {
        let pool = BufferPool::new(1, 16);
        {
            let mut buf = pool.acquire();
            buf.ensure_len(4096);
            buf.length = 10;
        }
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 4096);
        assert_eq!(buf.length, 0);
    }

    #[test]
    fn test_ensure_len_never_shrinks() {
        let mut buf = BytesBuffer::with_capacity(128);
        buf.ensure_len(8);
        assert_eq!(buf.capacity(), 128);
    }
}
