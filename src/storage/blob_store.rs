//! Persistent key → blob engine.
//!
//! Records are appended to a single data file and located through an in-memory
//! index keyed by the 64-bit hashed key. Size is bounded by record count and by
//! live byte footprint; when an insert would cross either ceiling the oldest
//! written records are evicted first (FIFO). Overwrites and evictions leave dead
//! space behind, which is reclaimed by compacting the data file once dead bytes
//! outweigh live ones.
//!
//! Startup never depends on a journal: a valid index snapshot is loaded
//! directly, anything else falls back to scanning the data file and truncating
//! it at the first record that does not check out.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::buffer_pool::BytesBuffer;
use crate::storage::record::{
    record_size, FormatError, IndexEntry, IndexSnapshot, RecordHeader, RECORD_HEADER_SIZE,
};

/// Name of the data file inside the store directory.
pub const DATA_FILE: &str = "blobs.dat";

/// Name of the index snapshot inside the store directory.
pub const INDEX_FILE: &str = "blobs.idx";

/// Dead bytes tolerated before compaction is considered at all.
const COMPACTION_MIN_DEAD_BYTES: u64 = 64 * 1024;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob store is closed")]
    Closed,

    #[error("record of {size} bytes exceeds store budget of {max} bytes")]
    RecordTooLarge { size: u64, max: u64 },

    #[error("corrupt record at offset {offset}: {source}")]
    Corrupted {
        offset: u64,
        #[source]
        source: FormatError,
    },

    #[error("invalid capacity: max_count={max_count}, max_bytes={max_bytes}")]
    InvalidCapacity { max_count: usize, max_bytes: u64 },
}

/// Where a live record sits and when it was written.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    body_len: u32,
    seq: u64,
}

impl Slot {
    fn record_size(&self) -> u64 {
        record_size(self.body_len as usize)
    }
}

/// Capacity and activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub bytes_used: u64,
    pub data_file_bytes: u64,
    pub max_count: usize,
    pub max_bytes: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub compactions: u64,
}

/// File-backed blob store. Not shareable between processes.
pub struct BlobStore {
    data_path: PathBuf,
    index_path: PathBuf,

    /// `None` once closed.
    file: Option<File>,

    max_count: usize,
    max_bytes: u64,

    index: HashMap<u64, Slot>,

    /// `(key, seq)` in write order. Entries whose seq no longer matches the
    /// index are stale and skipped.
    order: VecDeque<(u64, u64)>,
    next_seq: u64,

    /// Sum of record sizes of live records.
    live_bytes: u64,

    /// Length of the data file.
    data_len: u64,

    /// Index differs from the snapshot on disk.
    dirty: bool,

    stats: StoreStats,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("data_path", &self.data_path)
            .field("open", &self.file.is_some())
            .field("records", &self.index.len())
            .field("live_bytes", &self.live_bytes)
            .field("data_len", &self.data_len)
            .finish()
    }
}

impl BlobStore {
    /// Open (or create) a store in `dir`.
    ///
    /// An unreadable or damaged store is repaired rather than reported: the
    /// data file is truncated at the first invalid record, which may leave it
    /// empty. `truncate_on_open` discards existing content unconditionally.
    pub fn open(
        dir: impl AsRef<Path>,
        max_count: usize,
        max_bytes: u64,
        truncate_on_open: bool,
    ) -> Result<Self, StoreError> {
        if max_count == 0 || max_bytes == 0 {
            return Err(StoreError::InvalidCapacity {
                max_count,
                max_bytes,
            });
        }

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let data_path = dir.join(DATA_FILE);
        let index_path = dir.join(INDEX_FILE);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)?;

        let mut store = Self {
            data_path,
            index_path,
            file: Some(file),
            max_count,
            max_bytes,
            index: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            live_bytes: 0,
            data_len: 0,
            dirty: false,
            stats: StoreStats::default(),
        };

        if truncate_on_open {
            store.reset_files()?;
        } else {
            store.load()?;
        }
        store.enforce_ceilings(0);

        info!(
            path = %store.data_path.display(),
            records = store.index.len(),
            bytes = store.live_bytes,
            max_count,
            max_bytes,
            "Opened blob store"
        );

        Ok(store)
    }

    /// Write `body` under `key`, replacing any previous record for it.
    ///
    /// Oldest records are evicted until the new record fits both ceilings.
    pub fn insert(&mut self, key: u64, body: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;

        let size = record_size(body.len());
        if size > self.max_bytes || body.len() > u32::MAX as usize {
            return Err(StoreError::RecordTooLarge {
                size,
                max: self.max_bytes,
            });
        }

        self.mark_dirty();
        self.drop_slot(key);
        self.enforce_ceilings(size);

        let header = RecordHeader::for_body(key, body);
        let mut record = Vec::with_capacity(size as usize);
        header.encode(&mut record);
        record.extend_from_slice(body);

        let offset = self.data_len;
        if let Err(e) = self.append(offset, &record) {
            // Roll back a partially written tail so the next scan stays clean.
            if let Some(file) = &self.file {
                if let Err(rollback) = file.set_len(offset) {
                    warn!(
                        path = %self.data_path.display(),
                        offset,
                        error = %rollback,
                        "Failed to roll back partial record"
                    );
                }
            }
            return Err(e.into());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(
            key,
            Slot {
                offset,
                body_len: header.body_len,
                seq,
            },
        );
        self.order.push_back((key, seq));
        self.data_len += size;
        self.live_bytes += size;
        self.stats.inserts += 1;

        debug!(key, offset, size, "Inserted blob");

        self.maybe_compact()?;
        Ok(())
    }

    /// Copy the body stored under `key` into `buffer`.
    ///
    /// Returns `Ok(false)` when there is no such record. On a hit the buffer is
    /// grown as needed and its view covers exactly the body.
    pub fn lookup(&mut self, key: u64, buffer: &mut BytesBuffer) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let Some(slot) = self.index.get(&key).copied() else {
            return Ok(false);
        };

        let body_len = slot.body_len as usize;
        buffer.clear();
        buffer.ensure_len(body_len);

        let mut header_buf = [0u8; RECORD_HEADER_SIZE];
        {
            let mut file = self.file.as_ref().ok_or(StoreError::Closed)?;
            file.seek(SeekFrom::Start(slot.offset))?;
            file.read_exact(&mut header_buf)?;
            file.read_exact(&mut buffer.data[..body_len])?;
        }

        let checked = RecordHeader::decode(&header_buf).and_then(|header| {
            if header.key != key {
                return Err(FormatError::KeyMismatch {
                    expected: key,
                    found: header.key,
                });
            }
            header.verify(&buffer.data[..body_len])
        });

        if let Err(source) = checked {
            warn!(key, offset = slot.offset, error = %source, "Dropping corrupt record");
            self.mark_dirty();
            self.drop_slot(key);
            return Err(StoreError::Corrupted {
                offset: slot.offset,
                source,
            });
        }

        buffer.offset = 0;
        buffer.length = body_len;
        Ok(true)
    }

    /// Drop every record. Calling it on an empty store is a no-op.
    pub fn delete_all(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.index.is_empty() && self.data_len == 0 {
            return Ok(());
        }
        self.reset_files()?;
        info!(path = %self.data_path.display(), "Cleared blob store");
        Ok(())
    }

    /// Persist the index snapshot and sync the data file.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.dirty {
            self.write_snapshot()?;
        }
        if let Some(file) = &self.file {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Persist the index and release the data file. Idempotent.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.file.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        self.file = None;
        debug!(path = %self.data_path.display(), "Closed blob store");
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Number of live records, tombstones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live byte footprint (headers + bodies).
    pub fn bytes_used(&self) -> u64 {
        self.live_bytes
    }

    pub fn contains(&self, key: u64) -> bool {
        self.index.contains_key(&key)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.index.len(),
            bytes_used: self.live_bytes,
            data_file_bytes: self.data_len,
            max_count: self.max_count,
            max_bytes: self.max_bytes,
            ..self.stats.clone()
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.file.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn append(&self, offset: u64, record: &[u8]) -> io::Result<()> {
        let mut file = self.file.as_ref().ok_or_else(|| io::Error::other("closed"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(record)
    }

    /// Invalidate the on-disk snapshot before the first change after it was
    /// written, so a crash never pairs a stale snapshot with a newer data file.
    fn mark_dirty(&mut self) {
        if self.dirty {
            return;
        }
        self.dirty = true;
        if let Err(e) = fs::remove_file(&self.index_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.index_path.display(), error = %e, "Failed to remove index snapshot");
            }
        }
    }

    fn drop_slot(&mut self, key: u64) {
        if let Some(old) = self.index.remove(&key) {
            self.live_bytes -= old.record_size();
        }
    }

    /// Evict oldest records until one more record of `incoming` bytes fits.
    fn enforce_ceilings(&mut self, incoming: u64) {
        let extra = usize::from(incoming > 0);
        let mut evicted = 0usize;
        while self.index.len() + extra > self.max_count
            || self.live_bytes + incoming > self.max_bytes
        {
            if !self.evict_oldest() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            self.mark_dirty();
            debug!(
                evicted,
                records = self.index.len(),
                bytes = self.live_bytes,
                "Evicted oldest records"
            );
        }
        if self.order.len() > 2 * self.index.len() + 64 {
            self.prune_order();
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            match self.index.get(&key) {
                Some(slot) if slot.seq == seq => {
                    self.drop_slot(key);
                    self.stats.evictions += 1;
                    return true;
                }
                _ => continue,
            }
        }
        false
    }

    fn prune_order(&mut self) {
        let index = &self.index;
        self.order
            .retain(|(key, seq)| index.get(key).is_some_and(|slot| slot.seq == *seq));
    }

    /// Live records in write order.
    fn live_entries(&self) -> Vec<IndexEntry> {
        self.order
            .iter()
            .filter_map(|(key, seq)| {
                let slot = self.index.get(key)?;
                (slot.seq == *seq).then_some(IndexEntry {
                    key: *key,
                    offset: slot.offset,
                    body_len: slot.body_len,
                })
            })
            .collect()
    }

    fn reset_files(&mut self) -> Result<(), StoreError> {
        let file = self.file.as_ref().ok_or(StoreError::Closed)?;
        file.set_len(0)?;
        self.index.clear();
        self.order.clear();
        self.live_bytes = 0;
        self.data_len = 0;
        self.dirty = false;
        self.mark_dirty();
        Ok(())
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let file_len = self
            .file
            .as_ref()
            .ok_or(StoreError::Closed)?
            .metadata()?
            .len();

        match self.read_snapshot(file_len) {
            Some(snapshot) => {
                for entry in snapshot.entries {
                    self.apply_entry(entry);
                }
                self.data_len = file_len;
                debug!(records = self.index.len(), "Loaded index snapshot");
            }
            None => {
                self.scan(file_len)?;
                self.mark_dirty();
            }
        }
        Ok(())
    }

    fn apply_entry(&mut self, entry: IndexEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = Slot {
            offset: entry.offset,
            body_len: entry.body_len,
            seq,
        };
        if let Some(old) = self.index.insert(entry.key, slot) {
            self.live_bytes -= old.record_size();
        }
        self.live_bytes += slot.record_size();
        self.order.push_back((entry.key, seq));
    }

    /// A snapshot that decodes and matches the data file, or `None`.
    fn read_snapshot(&self, file_len: u64) -> Option<IndexSnapshot> {
        let bytes = match fs::read(&self.index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.index_path.display(), error = %e, "Unreadable index snapshot");
                return None;
            }
        };

        let snapshot = match IndexSnapshot::decode(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Invalid index snapshot, rescanning data file");
                return None;
            }
        };

        if snapshot.data_len != file_len {
            debug!(
                snapshot_len = snapshot.data_len,
                file_len, "Index snapshot is stale, rescanning data file"
            );
            return None;
        }

        // Entries must be disjoint, in file order and inside the file.
        let mut next_free = 0u64;
        for entry in &snapshot.entries {
            if entry.offset < next_free || entry.offset + entry.record_size() > file_len {
                warn!(offset = entry.offset, "Index snapshot out of bounds, rescanning data file");
                return None;
            }
            next_free = entry.offset + entry.record_size();
        }

        Some(snapshot)
    }

    /// Rebuild the index from the data file, truncating at the first bad record.
    fn scan(&mut self, file_len: u64) -> Result<(), StoreError> {
        let file = self.file.as_ref().ok_or(StoreError::Closed)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut header_buf = [0u8; RECORD_HEADER_SIZE];
        let mut body = Vec::new();
        let mut pos = 0u64;

        let failure = loop {
            let remaining = file_len - pos;
            if remaining == 0 {
                break None;
            }
            if remaining < RECORD_HEADER_SIZE as u64 {
                break Some(FormatError::Truncated {
                    need: RECORD_HEADER_SIZE,
                    have: remaining as usize,
                });
            }
            reader.read_exact(&mut header_buf)?;
            let header = match RecordHeader::decode(&header_buf) {
                Ok(header) => header,
                Err(e) => break Some(e),
            };
            if header.record_size() > remaining {
                break Some(FormatError::Truncated {
                    need: header.record_size() as usize,
                    have: remaining as usize,
                });
            }
            body.resize(header.body_len as usize, 0);
            reader.read_exact(&mut body)?;
            if let Err(e) = header.verify(&body) {
                break Some(e);
            }
            entries.push(IndexEntry {
                key: header.key,
                offset: pos,
                body_len: header.body_len,
            });
            pos += header.record_size();
        };
        drop(reader);

        if let Some(reason) = failure {
            warn!(
                path = %self.data_path.display(),
                offset = pos,
                dropped_bytes = file_len - pos,
                error = %reason,
                "Blob store damaged, truncating at first invalid record"
            );
            file.set_len(pos)?;
        }

        let recovered = entries.len();
        for entry in entries {
            self.apply_entry(entry);
        }
        self.data_len = pos;

        debug!(recovered, live = self.index.len(), "Scanned data file");
        Ok(())
    }

    fn write_snapshot(&mut self) -> Result<(), StoreError> {
        let snapshot = IndexSnapshot {
            data_len: self.data_len,
            entries: self.live_entries(),
        };

        let tmp_path = self.index_path.with_extension("idx.tmp");
        {
            let mut out = File::create(&tmp_path)?;
            out.write_all(&snapshot.encode())?;
            out.sync_all()?;
        }
        fs::rename(&tmp_path, &self.index_path)?;
        self.dirty = false;

        debug!(records = snapshot.entries.len(), "Wrote index snapshot");
        Ok(())
    }

    fn maybe_compact(&mut self) -> Result<(), StoreError> {
        let dead = self.data_len - self.live_bytes;
        if dead > self.live_bytes && dead > COMPACTION_MIN_DEAD_BYTES {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrite live records, oldest first, into a fresh data file.
    fn compact(&mut self) -> Result<(), StoreError> {
        let live = self.live_entries();
        let tmp_path = self.data_path.with_extension("dat.compact");

        let written = self.copy_live(&live, &tmp_path);
        let new_offsets = match written {
            Ok(offsets) => offsets,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // Release the old handle before replacing the file underneath it.
        self.file = None;
        let renamed = fs::rename(&tmp_path, &self.data_path);
        match OpenOptions::new().read(true).write(true).open(&self.data_path) {
            Ok(file) => self.file = Some(file),
            Err(e) => {
                warn!(
                    path = %self.data_path.display(),
                    error = %e,
                    "Failed to reopen data file after compaction, store is now closed"
                );
                return Err(e.into());
            }
        }
        if let Err(e) = renamed {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        let before = self.data_len;
        self.order.clear();
        let mut end = 0u64;
        for (entry, offset) in live.iter().zip(new_offsets) {
            if let Some(slot) = self.index.get_mut(&entry.key) {
                slot.offset = offset;
                self.order.push_back((entry.key, slot.seq));
            }
            end = offset + entry.record_size();
        }
        self.data_len = end;
        self.stats.compactions += 1;

        info!(
            before,
            after = self.data_len,
            records = live.len(),
            "Compacted blob store"
        );
        Ok(())
    }

    fn copy_live(&self, live: &[IndexEntry], tmp_path: &Path) -> Result<Vec<u64>, StoreError> {
        let mut src = self.file.as_ref().ok_or(StoreError::Closed)?;
        let mut out = BufWriter::new(File::create(tmp_path)?);
        let mut offsets = Vec::with_capacity(live.len());
        let mut scratch = Vec::new();
        let mut offset = 0u64;

        for entry in live {
            let size = entry.record_size();
            scratch.resize(size as usize, 0);
            src.seek(SeekFrom::Start(entry.offset))?;
            src.read_exact(&mut scratch)?;
            out.write_all(&scratch)?;
            offsets.push(offset);
            offset += size;
        }

        let out = out.into_inner().map_err(|e| e.into_error())?;
        out.sync_all()?;
        Ok(offsets)
    }
}

impl Drop for BlobStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.data_path.display(), error = %e, "Failed to close blob store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(store: &mut BlobStore, key: u64) -> Option<Vec<u8>> {
        let mut buf = BytesBuffer::with_capacity(4);
        store
            .lookup(key, &mut buf)
            .unwrap()
            .then(|| buf.as_slice().to_vec())
    }

    #[test]
    fn test_insert_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();

        store.insert(1, b"first").unwrap();
        store.insert(2, b"second record").unwrap();

        assert_eq!(read(&mut store, 1).as_deref(), Some(&b"first"[..]));
        assert_eq!(read(&mut store, 2).as_deref(), Some(&b"second record"[..]));
        assert_eq!(read(&mut store, 3), None);
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();

        store.insert(1, b"old").unwrap();
        store.insert(1, b"newer").unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes_used(), record_size(5));
        assert_eq!(read(&mut store, 1).as_deref(), Some(&b"newer"[..]));
    }

    #[test]
    fn test_empty_body_is_a_record() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();

        store.insert(9, b"").unwrap();
        let mut buf = BytesBuffer::with_capacity(0);
        assert!(store.lookup(9, &mut buf).unwrap());
        assert_eq!(buf.length, 0);
    }

    #[test]
    fn test_count_ceiling_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 3, 1 << 20, false).unwrap();

        for key in 0..4u64 {
            store.insert(key, b"v").unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(!store.contains(0));
        assert!(store.contains(3));
        assert_eq!(read(&mut store, 0), None);
        assert!(read(&mut store, 3).is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_refreshes_fifo_position() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 2, 1 << 20, false).unwrap();

        store.insert(1, b"a").unwrap();
        store.insert(2, b"b").unwrap();
        store.insert(1, b"a2").unwrap();
        store.insert(3, b"c").unwrap();

        assert!(read(&mut store, 1).is_some());
        assert_eq!(read(&mut store, 2), None);
    }

    #[test]
    fn test_byte_ceiling_holds() {
        let tmp = TempDir::new().unwrap();
        let max_bytes = record_size(100) * 3;
        let mut store = BlobStore::open(tmp.path(), 100, max_bytes, false).unwrap();

        for key in 0..10u64 {
            store.insert(key, &[key as u8; 100]).unwrap();
            assert!(store.bytes_used() <= max_bytes);
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 64, false).unwrap();
        store.insert(1, b"small").unwrap();

        let err = store.insert(2, &[0u8; 128]).unwrap_err();
        assert!(matches!(err, StoreError::RecordTooLarge { .. }));
        assert!(read(&mut store, 1).is_some());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            BlobStore::open(tmp.path(), 0, 10, false),
            Err(StoreError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_lookup_grows_small_buffer() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();
        store.insert(5, &[7u8; 1000]).unwrap();

        let mut buf = BytesBuffer::with_capacity(10);
        assert!(store.lookup(5, &mut buf).unwrap());
        assert!(buf.capacity() >= 1000);
        assert_eq!(buf.as_slice(), &[7u8; 1000][..]);
    }

    #[test]
    fn test_delete_all_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();

        store.delete_all().unwrap();
        store.insert(1, b"x").unwrap();
        store.delete_all().unwrap();
        store.delete_all().unwrap();

        assert!(store.is_empty());
        assert_eq!(store.bytes_used(), 0);
        assert_eq!(read(&mut store, 1), None);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();
        assert!(!store.is_closed());
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        assert!(matches!(store.insert(1, b"x"), Err(StoreError::Closed)));
        let mut buf = BytesBuffer::default();
        assert!(matches!(store.lookup(1, &mut buf), Err(StoreError::Closed)));
    }

    #[test]
    fn test_compaction_bounds_file_growth() {
        let tmp = TempDir::new().unwrap();
        let mut store = BlobStore::open(tmp.path(), 10, 1 << 20, false).unwrap();

        for i in 0..2_000u32 {
            store.insert(u64::from(i % 4), &[i as u8; 200]).unwrap();
        }

        let stats = store.stats();
        assert!(stats.compactions > 0);
        assert!(stats.data_file_bytes <= 2 * COMPACTION_MIN_DEAD_BYTES);
        for key in 0..4u64 {
            assert!(read(&mut store, key).is_some());
        }
    }
}
