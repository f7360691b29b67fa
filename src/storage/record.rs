//! On-disk layouts for the blob store.
//!
//! Data file (`blobs.dat`): a sequence of records, each
//!
//! ```text
//! [magic u32][key u64][body_len u32][checksum u32][body ...]
//! ```
//!
//! Index snapshot (`blobs.idx`): written on close/flush so the next open can
//! skip scanning the data file.
//!
//! ```text
//! [magic u32][version u32][data_len u64][count u32]
//! count × [key u64][offset u64][body_len u32]     (oldest first)
//! [crc64 u64 over everything above]
//! ```
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut};
use crc64fast_nvme::Digest;
use thiserror::Error;

/// Marks the start of every record.
pub const RECORD_MAGIC: u32 = 0x424C_4F42;

/// Size of the fixed record header.
pub const RECORD_HEADER_SIZE: usize = 20;

const INDEX_MAGIC: u32 = 0x5844_4942;
const INDEX_VERSION: u32 = 1;
const INDEX_HEADER_SIZE: usize = 20;
const INDEX_ENTRY_SIZE: usize = 20;
const INDEX_TRAILER_SIZE: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("record key {found:#x} does not match index key {expected:#x}")]
    KeyMismatch { expected: u64, found: u64 },
}

/// Total on-disk size of a record with a body of `body_len` bytes.
pub fn record_size(body_len: usize) -> u64 {
    (RECORD_HEADER_SIZE + body_len) as u64
}

fn fold_crc64(value: u64) -> u32 {
    (value as u32) ^ ((value >> 32) as u32)
}

fn record_checksum(key: u64, body: &[u8]) -> u32 {
    let mut digest = Digest::new();
    digest.write(&key.to_le_bytes());
    digest.write(&(body.len() as u32).to_le_bytes());
    digest.write(body);
    fold_crc64(digest.sum64())
}

/// Fixed-size header in front of every record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: u64,
    pub body_len: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn for_body(key: u64, body: &[u8]) -> Self {
        Self {
            key,
            body_len: body.len() as u32,
            checksum: record_checksum(key, body),
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(RECORD_MAGIC);
        out.put_u64_le(self.key);
        out.put_u32_le(self.body_len);
        out.put_u32_le(self.checksum);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(FormatError::Truncated {
                need: RECORD_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let magic = buf.get_u32_le();
        if magic != RECORD_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        Ok(Self {
            key: buf.get_u64_le(),
            body_len: buf.get_u32_le(),
            checksum: buf.get_u32_le(),
        })
    }

    pub fn verify(&self, body: &[u8]) -> Result<(), FormatError> {
        if body.len() != self.body_len as usize {
            return Err(FormatError::Truncated {
                need: self.body_len as usize,
                have: body.len(),
            });
        }
        if record_checksum(self.key, body) != self.checksum {
            return Err(FormatError::ChecksumMismatch);
        }
        Ok(())
    }

    pub fn record_size(&self) -> u64 {
        record_size(self.body_len as usize)
    }
}

/// Location of one live record in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: u64,
    /// Offset of the record header.
    pub offset: u64,
    pub body_len: u32,
}

impl IndexEntry {
    pub fn record_size(&self) -> u64 {
        record_size(self.body_len as usize)
    }
}

/// Persisted copy of the in-memory index, valid only for a data file of
/// exactly `data_len` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub data_len: u64,
    /// Live records, oldest write first.
    pub entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            INDEX_HEADER_SIZE + self.entries.len() * INDEX_ENTRY_SIZE + INDEX_TRAILER_SIZE,
        );
        out.put_u32_le(INDEX_MAGIC);
        out.put_u32_le(INDEX_VERSION);
        out.put_u64_le(self.data_len);
        out.put_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            out.put_u64_le(entry.key);
            out.put_u64_le(entry.offset);
            out.put_u32_le(entry.body_len);
        }
        let mut digest = Digest::new();
        digest.write(&out);
        out.put_u64_le(digest.sum64());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        let min = INDEX_HEADER_SIZE + INDEX_TRAILER_SIZE;
        if buf.len() < min {
            return Err(FormatError::Truncated {
                need: min,
                have: buf.len(),
            });
        }

        let (body, mut trailer) = buf.split_at(buf.len() - INDEX_TRAILER_SIZE);
        let mut digest = Digest::new();
        digest.write(body);
        if digest.sum64() != trailer.get_u64_le() {
            return Err(FormatError::ChecksumMismatch);
        }

        let mut cur = body;
        let magic = cur.get_u32_le();
        if magic != INDEX_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let version = cur.get_u32_le();
        if version != INDEX_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let data_len = cur.get_u64_le();
        let count = cur.get_u32_le() as usize;

        let need = count * INDEX_ENTRY_SIZE;
        if cur.remaining() != need {
            return Err(FormatError::Truncated {
                need,
                have: cur.remaining(),
            });
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(IndexEntry {
                key: cur.get_u64_le(),
                offset: cur.get_u64_le(),
                body_len: cur.get_u32_le(),
            });
        }

        Ok(Self { data_len, entries })
    }
}
