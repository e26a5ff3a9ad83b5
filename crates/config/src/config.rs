//! Node configuration loaded from a single TOML file.

use crate::error::{ConfigError, ConfigResult};
use lattice_types::{Address, ChainCoordinate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chain identity and fee policy.
    #[serde(default)]
    pub chain: ChainConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Transaction pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Batch parameters handed to the consensus engine.
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Script interpreter limits.
    #[serde(default)]
    pub vm: VmSettings,
    /// Optional document-store mirror tap.
    #[serde(default)]
    pub mirror: MirrorConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
                name: "config",
                value: e.to_string(),
            })?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain.chain_coordinate()?;
        if let Some(addr) = &self.chain.fee_collector {
            addr.parse::<Address>()
                .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?;
        }
        if self.pool.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "pool.capacity",
                value: "0".into(),
            });
        }
        if self.consensus.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "consensus.batch_size",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

/// Chain identity and fee policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Hex chain coordinate of the local chain (e.g. `"00"`).
    pub chain_id: String,
    /// Address credited with transaction fees; zero address when unset.
    #[serde(default)]
    pub fee_collector: Option<String>,
}

impl ChainConfig {
    /// Parses the chain coordinate.
    pub fn chain_coordinate(&self) -> ConfigResult<ChainCoordinate> {
        ChainCoordinate::from_hex(&self.chain_id)
            .map_err(|_| ConfigError::InvalidChainCoordinate(self.chain_id.clone()))
    }

    /// Parses the fee collector address, defaulting to the zero address.
    pub fn fee_collector_address(&self) -> ConfigResult<Address> {
        match &self.fee_collector {
            Some(addr) => addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(addr.clone())),
            None => Ok(Address::ZERO),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: "00".to_string(),
            fee_collector: None,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the key/value store.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/lattice".to_string(),
        }
    }
}

/// Transaction pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of transactions held by the pool.
    pub capacity: usize,
    /// Extra transactions accumulated beyond the batch size before the size
    /// trigger submits a batch.
    pub tx_pool_delay: usize,
    /// Blacklist entry lifetime in seconds.
    pub blacklist_duration_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            tx_pool_delay: 10,
            blacklist_duration_secs: 300,
        }
    }
}

/// Batch parameters handed to the consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Preferred number of transactions per batch.
    pub batch_size: usize,
    /// Partial-batch submission timeout in milliseconds.
    pub batch_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            batch_size: 2000,
            batch_timeout_ms: 1000,
        }
    }
}

/// Script interpreter resource limits (the `vm.*` keys).
///
/// Every field has a built-in default; a config file only needs to name the
/// keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmSettings {
    /// Interpreter registry cap.
    pub registry_size: usize,
    /// Interpreter call-stack cap.
    pub call_stack_size: usize,
    /// Per-VM memory cap in megabytes.
    pub max_mem: usize,
    /// Script stack depth.
    pub exec_limit_stack_depth: usize,
    /// Opcode budget per invocation.
    pub exec_limit_max_opcode_count: u64,
    /// Runtime cap in milliseconds.
    pub exec_limit_max_run_time: u64,
    /// Script size cap in bytes.
    pub exec_limit_max_script_size: usize,
    /// Per-write state value size cap in bytes.
    pub exec_limit_max_state_value_size: usize,
    /// Per-write state key length cap.
    pub exec_limit_max_state_key_length: usize,
    /// Staged state item count cap per transaction.
    pub exec_limit_max_state_item_count: usize,
    /// Workers per interpreter flavor.
    pub bs_worker_cnt: usize,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            registry_size: 256,
            call_stack_size: 256,
            max_mem: 200,
            exec_limit_stack_depth: 256,
            exec_limit_max_opcode_count: 5_000_000,
            exec_limit_max_run_time: 1_000,
            exec_limit_max_script_size: 128 * 1024,
            exec_limit_max_state_value_size: 50 * 1024,
            exec_limit_max_state_key_length: 128,
            exec_limit_max_state_item_count: 1_000,
            bs_worker_cnt: 2,
        }
    }
}

/// Optional document-store mirror tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Whether the mirror tap is wired at all.
    pub enabled: bool,
    /// Directory where failing batches are persisted before the mirror
    /// switches to drop-with-warning mode.
    pub exception_dir: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exception_dir: "./data/lattice-exceptions".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. `"info"` or `"lattice=debug"`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chain]
            chain_id = "0001"

            [vm]
            exec_limit_max_run_time = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.chain.chain_id, "0001");
        assert_eq!(config.vm.exec_limit_max_run_time, 50);
        assert_eq!(config.vm.bs_worker_cnt, VmSettings::default().bs_worker_cnt);
        assert_eq!(config.pool.capacity, PoolConfig::default().capacity);
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = Config::default();
        config.pool.capacity = 0;
        assert!(config.validate().is_err());
    }
}
