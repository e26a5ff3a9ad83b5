//! Chain coordinates.
//!
//! A chain coordinate is a hex-encoded byte path naming a (sub)chain, e.g.
//! `"00"` for the root chain or `"0001"` for its second child. Transactions
//! carry a source and a destination coordinate; the validator only touches
//! local balances for the sides whose coordinate equals the local chain id.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A hex-encoded path naming a (sub)chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChainCoordinate(Vec<u8>);

impl ChainCoordinate {
    /// Creates a coordinate from raw path bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Parses a coordinate from its hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(s)?))
    }

    /// Returns the raw path bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hex form without a prefix.
    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }
}

impl FromStr for ChainCoordinate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ChainCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl fmt::Debug for ChainCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainCoordinate({})", self.to_hex_string())
    }
}

impl Serialize for ChainCoordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for ChainCoordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let coord = ChainCoordinate::from_hex("0001").unwrap();
        assert_eq!(coord.as_bytes(), &[0x00, 0x01]);
        assert_eq!(coord.to_hex_string(), "0001");
    }

    #[test]
    fn root_chain() {
        let coord = ChainCoordinate::from_hex("00").unwrap();
        assert_eq!(coord.as_bytes(), &[0x00]);
    }
}
