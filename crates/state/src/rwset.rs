//! Read/write sets.
//!
//! A [`KvRwSet`] records, per composite key, the first value observed during
//! a block or transaction (`reads`) and the last intended mutation
//! (`writes`). Ordered maps keep iteration lexicographic on the composite
//! key, which range queries and the canonical encoding rely on.

use lattice_types::codec;
use std::collections::BTreeMap;

/// A staged mutation: a value to store, or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    /// Store this value.
    Put(Vec<u8>),
    /// Remove the key.
    Delete,
}

impl KvWrite {
    /// The value this write leaves behind (`None` for tombstones).
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            KvWrite::Put(value) => Some(value),
            KvWrite::Delete => None,
        }
    }
}

/// One namespace's read and write overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvRwSet {
    /// First-observed value per key; `None` records an observed absence.
    pub reads: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Last-wins mutation overlay.
    pub writes: BTreeMap<Vec<u8>, KvWrite>,
}

impl KvRwSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when neither reads nor writes were recorded.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Records an observation unless the key was already observed.
    pub fn record_read(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.reads.entry(key).or_insert(value);
    }

    /// The effective value of `key` inside this overlay, if the overlay
    /// knows about it: `Some(None)` for a tombstone or observed absence.
    pub fn effective(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        if let Some(write) = self.writes.get(key) {
            return Some(write.value());
        }
        self.reads.get(key).map(|read| read.as_deref())
    }

    /// Canonical byte encoding: sorted reads then sorted writes, each entry
    /// length-prefixed. Used for the block state root.
    pub fn canonical_encoding(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_varint(&mut buf, self.reads.len() as u64);
        for (key, value) in &self.reads {
            codec::write_bytes(&mut buf, key);
            match value {
                Some(value) => {
                    buf.push(1);
                    codec::write_bytes(&mut buf, value);
                }
                None => buf.push(0),
            }
        }
        codec::write_varint(&mut buf, self.writes.len() as u64);
        for (key, write) in &self.writes {
            codec::write_bytes(&mut buf, key);
            match write {
                KvWrite::Put(value) => {
                    buf.push(1);
                    codec::write_bytes(&mut buf, value);
                }
                KvWrite::Delete => buf.push(0),
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_read_is_first_wins() {
        let mut set = KvRwSet::new();
        set.record_read(b"k".to_vec(), Some(b"first".to_vec()));
        set.record_read(b"k".to_vec(), Some(b"second".to_vec()));
        assert_eq!(set.reads[b"k".as_slice()], Some(b"first".to_vec()));
    }

    #[test]
    fn effective_prefers_writes() {
        let mut set = KvRwSet::new();
        set.record_read(b"k".to_vec(), Some(b"old".to_vec()));
        set.writes.insert(b"k".to_vec(), KvWrite::Put(b"new".to_vec()));
        assert_eq!(set.effective(b"k"), Some(Some(b"new".as_slice())));

        set.writes.insert(b"k".to_vec(), KvWrite::Delete);
        assert_eq!(set.effective(b"k"), Some(None));
    }

    #[test]
    fn canonical_encoding_is_order_independent() {
        let mut a = KvRwSet::new();
        a.writes.insert(b"x".to_vec(), KvWrite::Put(b"1".to_vec()));
        a.writes.insert(b"a".to_vec(), KvWrite::Put(b"2".to_vec()));

        let mut b = KvRwSet::new();
        b.writes.insert(b"a".to_vec(), KvWrite::Put(b"2".to_vec()));
        b.writes.insert(b"x".to_vec(), KvWrite::Put(b"1".to_vec()));

        assert_eq!(a.canonical_encoding(), b.canonical_encoding());
    }
}
