//! Asset registry records.

use crate::{Result, StateError};
use lattice_types::Address;
use serde::{Deserialize, Serialize};

/// An asset registered on the chain.
///
/// After creation `id`, `issuer` and `owner` are immutable; updates may only
/// touch the remaining attributes, and only keys already present in the old
/// JSON projection are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Asset {
    /// Asset identifier.
    pub id: u32,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub descr: String,
    /// Divisibility precision.
    #[serde(default)]
    pub precision: u64,
    /// Expiration time (seconds since epoch; 0 = never).
    #[serde(default)]
    pub expiration: u32,
    /// Issuer address (the sender of the `Issue` transaction).
    #[serde(default)]
    pub issuer: Address,
    /// Owner address (the recipient of the `Issue` transaction).
    #[serde(default)]
    pub owner: Address,
}

impl Asset {
    /// Applies a JSON update, merging only keys that already exist in the
    /// old projection and rejecting any change to the read-only attributes.
    pub fn update(&self, json_str: &str) -> Result<Asset> {
        if json_str.is_empty() {
            return Ok(self.clone());
        }

        let new_val: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json_str)
            .map_err(|e| StateError::InvalidAssetPayload(e.to_string()))?;

        let old_json =
            serde_json::to_value(self).map_err(|e| StateError::InvalidAssetPayload(e.to_string()))?;
        let mut old_val = match old_json {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("asset serializes to an object"),
        };

        for (key, value) in new_val {
            if let Some(slot) = old_val.get_mut(&key) {
                *slot = value;
            }
        }

        let merged: Asset = serde_json::from_value(serde_json::Value::Object(old_val))
            .map_err(|e| StateError::InvalidAssetPayload(e.to_string()))?;

        if merged.id != self.id || merged.issuer != self.issuer || merged.owner != self.owner {
            return Err(StateError::AssetReadOnly);
        }
        Ok(merged)
    }

    /// Serializes the asset for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("asset serializes to JSON")
    }

    /// Deserializes an asset from storage bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Asset> {
        serde_json::from_slice(data).map_err(|e| StateError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_asset() -> Asset {
        Asset {
            id: 7,
            name: "seven".into(),
            descr: String::new(),
            precision: 2,
            expiration: 0,
            issuer: Address::new([1u8; 20]),
            owner: Address::new([2u8; 20]),
        }
    }

    #[test]
    fn merges_existing_keys_only() {
        let asset = base_asset();
        let updated = asset
            .update(r#"{"name":"renamed","unknown":"ignored"}"#)
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.precision, 2);
    }

    #[test]
    fn owner_change_rejected() {
        let asset = base_asset();
        let other = Address::new([9u8; 20]).to_hex_string();
        let err = asset
            .update(&format!(r#"{{"owner":"{other}"}}"#))
            .unwrap_err();
        assert!(matches!(err, StateError::AssetReadOnly));
    }

    #[test]
    fn id_change_rejected() {
        let err = base_asset().update(r#"{"id":8}"#).unwrap_err();
        assert!(matches!(err, StateError::AssetReadOnly));
    }

    #[test]
    fn empty_update_is_identity() {
        let asset = base_asset();
        assert_eq!(asset.update("").unwrap(), asset);
    }

    #[test]
    fn storage_round_trip() {
        let asset = base_asset();
        assert_eq!(Asset::from_bytes(&asset.to_bytes()).unwrap(), asset);
    }
}
