//! Genesis configuration and block generation.
//!
//! The genesis document is JSON so it can be shared across nodes. It names
//! the issuing key, the public addresses of the deployment, and the initial
//! issuance. Exactly one issuance is generated, to the first listed address.

use crate::error::{ConfigError, ConfigResult};
use k256::ecdsa::SigningKey;
use lattice_types::{Address, Block, BlockHeader, ChainCoordinate, Transaction, TxType, H256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Header nonce used for generated blocks.
pub const BLOCK_NONCE: u32 = 100;

/// Genesis state shared by every node of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Hex chain coordinate the deployment starts on.
    pub chain_id: String,
    /// Hex-encoded secp256k1 private key that signs the genesis issuance.
    pub issuer_key: String,
    /// Public addresses of the deployment; the issuance goes to the first.
    pub addresses: Vec<String>,
    /// Identifier of the genesis asset.
    #[serde(default)]
    pub asset_id: u32,
    /// Amount of the genesis asset issued to the first address.
    #[serde(default = "default_issue_amount")]
    pub issue_amount: i64,
}

fn default_issue_amount() -> i64 {
    1_000_000_000
}

impl GenesisConfig {
    /// Loads genesis configuration from a JSON file.
    pub fn load_json(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "loading genesis");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source: e,
        })?;
        let genesis: GenesisConfig = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Saves genesis configuration to a JSON file.
    pub fn save_json(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validates the genesis document.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain_coordinate()?;
        self.signing_key()?;
        if self.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        for addr in &self.addresses {
            addr.parse::<Address>()
                .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?;
        }
        if self.issue_amount < 0 {
            return Err(ConfigError::InvalidValue {
                name: "issue_amount",
                value: self.issue_amount.to_string(),
            });
        }
        Ok(())
    }

    /// Parses the chain coordinate.
    pub fn chain_coordinate(&self) -> ConfigResult<ChainCoordinate> {
        ChainCoordinate::from_hex(&self.chain_id)
            .map_err(|_| ConfigError::InvalidChainCoordinate(self.chain_id.clone()))
    }

    /// Parses the issuing key.
    pub fn signing_key(&self) -> ConfigResult<SigningKey> {
        let hex_key = self.issuer_key.strip_prefix("0x").unwrap_or(&self.issuer_key);
        let bytes =
            hex::decode(hex_key).map_err(|e| ConfigError::InvalidIssuerKey(e.to_string()))?;
        SigningKey::from_slice(&bytes).map_err(|e| ConfigError::InvalidIssuerKey(e.to_string()))
    }

    /// Generates the genesis block: height 0, nil parent, and a single signed
    /// issuance of the genesis asset to the first listed address.
    pub fn generate_genesis_block(&self) -> ConfigResult<Block> {
        let chain = self.chain_coordinate()?;
        let key = self.signing_key()?;
        let recipient: Address = self.addresses[0]
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.addresses[0].clone()))?;

        let payload = serde_json::to_vec(&serde_json::json!({ "id": self.asset_id }))?;
        let issue = Transaction::new(
            chain.clone(),
            chain,
            TxType::Issue,
            0,
            Address::ZERO,
            recipient,
            self.asset_id,
            self.issue_amount,
            0,
            0,
        )
        .with_payload(payload)
        .sign(&key)
        .map_err(|e| ConfigError::InvalidIssuerKey(e.to_string()))?;

        let header = BlockHeader::new(H256::NIL, H256::NIL, 0, 0, BLOCK_NONCE);
        let block = Block::new(header, vec![issue]);
        info!(hash = %block.hash(), "generated genesis block");
        Ok(block)
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        // Throwaway development key; real deployments generate their own.
        Self {
            chain_id: "00".to_string(),
            issuer_key: "0x46b9e861b63d3509c88b7817275a30d22d62c8cd8fa6486ddee35ef0d8e0495f"
                .to_string(),
            addresses: vec!["0x0000000000000000000000000000000000000001".to_string()],
            asset_id: 0,
            issue_amount: default_issue_amount(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_genesis_generates_block() {
        let genesis = GenesisConfig::default();
        genesis.validate().unwrap();
        let block = genesis.generate_genesis_block().unwrap();
        assert_eq!(block.height(), 0);
        assert_eq!(block.previous_hash(), H256::NIL);
        assert_eq!(block.transactions.len(), 1);
        let issue = &block.transactions[0];
        assert_eq!(issue.tx_type, TxType::Issue);
        assert!(issue.verify().is_ok());
    }

    #[test]
    fn single_issuance_even_with_many_addresses() {
        let mut genesis = GenesisConfig::default();
        genesis
            .addresses
            .push("0x0000000000000000000000000000000000000002".to_string());
        let block = genesis.generate_genesis_block().unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(
            block.transactions[0].recipient,
            genesis.addresses[0].parse().unwrap()
        );
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let genesis = GenesisConfig::default();
        genesis.save_json(&path).unwrap();
        let loaded = GenesisConfig::load_json(&path).unwrap();
        assert_eq!(loaded.chain_id, genesis.chain_id);
        assert_eq!(loaded.issue_amount, genesis.issue_amount);
    }
}
