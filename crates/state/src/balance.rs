//! Account balances.
//!
//! A balance maps asset ids to arbitrary-precision signed integers and
//! carries the account's nonce counter. Negative values are legal only
//! inside staging; the validator rejects them before commit except for the
//! sender side of `Issue`/`IssueUpdate`.

use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balances of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Balance {
    /// Amount per asset id.
    pub amounts: BTreeMap<u32, BigInt>,
    /// Account nonce counter.
    pub nonce: u32,
}

impl Balance {
    /// Creates an empty balance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount held of `asset_id` (zero when absent).
    pub fn get(&self, asset_id: u32) -> BigInt {
        self.amounts.get(&asset_id).cloned().unwrap_or_else(BigInt::zero)
    }

    /// Adds `delta` (possibly negative) to the amount of `asset_id`.
    pub fn add(&mut self, asset_id: u32, delta: &BigInt) {
        let entry = self.amounts.entry(asset_id).or_insert_with(BigInt::zero);
        *entry += delta;
    }

    /// Sets the amount of `asset_id`.
    pub fn set(&mut self, asset_id: u32, amount: BigInt) {
        self.amounts.insert(asset_id, amount);
    }

    /// True when the amount of `asset_id` is negative.
    pub fn is_negative(&self, asset_id: u32) -> bool {
        self.get(asset_id).sign() == Sign::Minus
    }
}

/// Encodes an amount for storage (two's-complement big-endian; empty = zero).
pub fn encode_amount(amount: &BigInt) -> Vec<u8> {
    if amount.is_zero() {
        return Vec::new();
    }
    amount.to_signed_bytes_be()
}

/// Decodes a stored amount (empty = zero).
pub fn decode_amount(data: &[u8]) -> BigInt {
    if data.is_empty() {
        return BigInt::zero();
    }
    BigInt::from_signed_bytes_be(data)
}

/// Encodes a nonce counter for storage.
pub fn encode_nonce(nonce: u32) -> Vec<u8> {
    nonce.to_le_bytes().to_vec()
}

/// Decodes a stored nonce counter (empty or short = zero).
pub fn decode_nonce(data: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    let n = data.len().min(4);
    bytes[..n].copy_from_slice(&data[..n]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut balance = Balance::new();
        balance.add(0, &BigInt::from(100));
        balance.add(0, &BigInt::from(-30));
        assert_eq!(balance.get(0), BigInt::from(70));
        assert_eq!(balance.get(1), BigInt::zero());
    }

    #[test]
    fn negative_detection() {
        let mut balance = Balance::new();
        balance.add(2, &BigInt::from(-1));
        assert!(balance.is_negative(2));
        assert!(!balance.is_negative(0));
    }

    #[test]
    fn amount_encoding_round_trip() {
        for value in [0i64, 1, -1, 1_000_000_000_000, -987_654_321] {
            let amount = BigInt::from(value);
            assert_eq!(decode_amount(&encode_amount(&amount)), amount);
        }
    }

    #[test]
    fn zero_encodes_empty() {
        assert!(encode_amount(&BigInt::zero()).is_empty());
    }
}
