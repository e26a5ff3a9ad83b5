//! Composite-key encoding for the state column families.
//!
//! Multi-dimensional state is flattened into a single ordered keyspace by
//! concatenating a length-prefixed namespace and key:
//!
//! ```text
//! varint-len(ns) || ns || varint-len(key) || key
//! ```
//!
//! Decoding is the exact inverse. Because the namespace carries its own
//! length prefix, a prefix scan over `encode_composite_key(ns, "")` visits
//! exactly the keys of that namespace.

use crate::{Result, StorageError};
use lattice_types::codec::{self, Reader};

/// Encodes `(namespace, key)` into a composite key.
pub fn encode_composite_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + namespace.len() + key.len());
    codec::write_bytes(&mut buf, namespace.as_bytes());
    codec::write_bytes(&mut buf, key.as_bytes());
    buf
}

/// Returns the scan prefix covering every key of `namespace`.
///
/// This is the namespace's length-prefixed encoding without any key part;
/// because each namespace carries its own length, prefix scans never bleed
/// into a namespace that merely shares leading bytes.
pub fn namespace_prefix(namespace: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + namespace.len());
    codec::write_bytes(&mut buf, namespace.as_bytes());
    buf
}

/// Decodes a composite key back into `(namespace, key)`.
pub fn decode_composite_key(data: &[u8]) -> Result<(String, String)> {
    let mut reader = Reader::new(data);
    let namespace = reader
        .read_bytes()
        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    let key = reader
        .read_bytes()
        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    if !reader.is_empty() {
        return Err(StorageError::InvalidKey(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }
    let namespace = String::from_utf8(namespace.to_vec())
        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    let key =
        String::from_utf8(key.to_vec()).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    Ok((namespace, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for (ns, key) in [
            ("asset", "7$"),
            ("0x742d35cc6634c0532925a3b844bc9e7595f0beb1", "0$"),
            ("contract", ""),
            ("", ""),
        ] {
            let encoded = encode_composite_key(ns, key);
            let (dns, dkey) = decode_composite_key(&encoded).unwrap();
            assert_eq!((dns.as_str(), dkey.as_str()), (ns, key));
        }
    }

    #[test]
    fn namespace_prefix_isolates_namespaces() {
        let prefix = namespace_prefix("alice");
        let inside = encode_composite_key("alice", "k");
        let outside = encode_composite_key("alicex", "k");
        assert!(inside.starts_with(&prefix));
        assert!(!outside.starts_with(&prefix));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = encode_composite_key("ns", "key");
        encoded.push(0);
        assert!(decode_composite_key(&encoded).is_err());
    }
}
