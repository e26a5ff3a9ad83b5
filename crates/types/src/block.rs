//! Block and BlockHeader types.
//!
//! The header has a fixed on-wire encoding (all integers little-endian):
//!
//! ```text
//! previousHash(32) || merkleRoot(32) || timestamp(u32) || height(u32) || nonce(u32)
//! ```
//!
//! The block hash is the Keccak256 digest of that encoding. Height is
//! strictly monotonic and `previous_hash` must equal the hash of the
//! preceding block's header.

use crate::codec::{self, Reader};
use crate::{merkle_root, Error, Result, Transaction, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the fixed header encoding in bytes.
pub const HEADER_SIZE: usize = 32 + 32 + 4 + 4 + 4;

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Hash of the previous block's header (nil for genesis)
    pub previous_hash: H256,
    /// Merkle root over the accepted transaction hashes, in order
    pub merkle_root: H256,
    /// Block creation time (seconds since epoch)
    pub timestamp: u32,
    /// Block height (genesis is 0)
    pub height: u32,
    /// Header nonce
    pub nonce: u32,
}

impl BlockHeader {
    /// Creates a new header.
    pub fn new(
        previous_hash: H256,
        merkle_root: H256,
        timestamp: u32,
        height: u32,
        nonce: u32,
    ) -> Self {
        Self {
            previous_hash,
            merkle_root,
            timestamp,
            height,
            nonce,
        }
    }

    /// Fixed-order wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(self.previous_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        codec::write_u32(&mut buf, self.timestamp);
        codec::write_u32(&mut buf, self.height);
        codec::write_u32(&mut buf, self.nonce);
        buf
    }

    /// Decodes a header from its wire encoding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != HEADER_SIZE {
            return Err(Error::InvalidLength {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let previous_hash = H256::from_slice(&data[0..32])?;
        let merkle_root = H256::from_slice(&data[32..64])?;
        let mut reader = Reader::new(&data[64..]);
        Ok(Self {
            previous_hash,
            merkle_root,
            timestamp: reader.read_u32()?,
            height: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    /// Returns the block hash (hash of the header encoding).
    pub fn hash(&self) -> H256 {
        H256::keccak256(&self.encode())
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, parent: {})",
            self.height,
            self.hash(),
            self.previous_hash
        )
    }
}

/// A complete block: header plus ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    /// The block header
    pub header: BlockHeader,
    /// The transactions in this block, in consensus order
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Returns the block hash (hash of the header).
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Returns the block height.
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Returns the previous block hash.
    pub fn previous_hash(&self) -> H256 {
        self.header.previous_hash
    }

    /// Computes the Merkle root over the transaction hashes, in order.
    pub fn compute_merkle_root(&self) -> H256 {
        merkle_root(&self.transactions.iter().map(|tx| tx.hash()).collect::<Vec<_>>())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, {} txs)",
            self.header.height,
            self.hash(),
            self.transactions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_round_trip() {
        let header = BlockHeader::new(
            H256::keccak256(b"parent"),
            H256::keccak256(b"root"),
            1_700_000_000,
            42,
            100,
        );
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);
        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(header.hash(), decoded.hash());
    }

    #[test]
    fn decode_rejects_bad_length() {
        assert!(BlockHeader::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn hash_depends_on_every_field() {
        let base = BlockHeader::new(H256::ZERO, H256::ZERO, 0, 0, 100);
        let mut other = base.clone();
        other.height = 1;
        assert_ne!(base.hash(), other.hash());
        let mut other = base.clone();
        other.timestamp = 1;
        assert_ne!(base.hash(), other.hash());
    }
}
