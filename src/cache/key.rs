//! Key derivation for the disk tier.
//!
//! A caller key is turned into a *composite key* (length-prefixed UTF-8, with an
//! optional namespace) that is stored in front of every record body, and a
//! 64-bit CRC of that composite key which is used as the store index.

use bytes::BufMut;
use crc64fast_nvme::Digest;

/// Hash function signature used to index records.
pub type HashFn = fn(&[u8]) -> u64;

/// Length of the composite key prefix in bytes.
const LEN_PREFIX: usize = 4;

/// CRC-64 of `bytes`. Stable across processes, platforms and runs.
pub fn crc64(bytes: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(bytes);
    digest.sum64()
}

/// Derives composite and hashed keys from caller keys.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    namespace: Option<String>,
    hash_fn: HashFn,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(None)
    }
}

impl KeyCodec {
    /// Create a codec, optionally qualifying every key with `namespace`.
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            hash_fn: crc64,
        }
    }

    /// Replace the hash function. Mostly useful to force collisions in tests.
    pub fn with_hasher(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Encode `key` as `[u32 LE body length][body]`.
    ///
    /// The length prefix means no composite key is a strict prefix of another,
    /// so a record body can always be checked against its expected owner.
    pub fn composite_key(&self, key: &str) -> Vec<u8> {
        let body_len = match &self.namespace {
            Some(ns) => ns.len() + 1 + key.len(),
            None => key.len(),
        };

        let mut out = Vec::with_capacity(LEN_PREFIX + body_len);
        out.put_u32_le(body_len as u32);
        if let Some(ns) = &self.namespace {
            out.put_slice(ns.as_bytes());
            out.put_u8(b':');
        }
        out.put_slice(key.as_bytes());
        out
    }

    /// Hash a composite key into the store index.
    pub fn hash(&self, composite: &[u8]) -> u64 {
        (self.hash_fn)(composite)
    }

    /// Composite key and its hash in one call.
    pub fn derive(&self, key: &str) -> (Vec<u8>, u64) {
        let composite = self.composite_key(key);
        let hashed = self.hash(&composite);
        (composite, hashed)
    }
}

/// Whether `record` was written for `composite`.
pub fn is_same_key(composite: &[u8], record: &[u8]) -> bool {
    record.len() >= composite.len() && record[..composite.len()] == *composite
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key_is_length_prefixed() {
        let codec = KeyCodec::default();
        let key = codec.composite_key("user:1");
        assert_eq!(&key[..4], &6u32.to_le_bytes());
        assert_eq!(&key[4..], b"user:1");
    }

    #[test]
    fn test_namespace_changes_hash() {
        let plain = KeyCodec::default();
        let scoped = KeyCodec::new(Some("app".to_string()));
        assert_eq!(&scoped.composite_key("k")[4..], b"app:k");
        assert_ne!(plain.derive("k").1, scoped.derive("k").1);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let codec = KeyCodec::default();
        let a = codec.derive("alpha").1;
        let b = KeyCodec::default().derive("alpha").1;
        assert_eq!(a, b);
        assert_ne!(a, codec.derive("alphb").1);
    }

    #[test]
    fn test_prefix_keys_do_not_match() {
        let codec = KeyCodec::default();
        let short = codec.composite_key("ab");
        let mut record = codec.composite_key("abc");
        record.extend_from_slice(b"payload");

        assert!(!is_same_key(&short, &record));
        assert!(is_same_key(&codec.composite_key("abc"), &record));
        assert!(!is_same_key(&record, &short));
    }
}
