//! `lattice init` - write a default configuration and genesis document.

use anyhow::Context;
use clap::Args;
use lattice_config::{Config, GenesisConfig};
use std::path::PathBuf;
use tracing::info;

/// Writes `lattice.toml` and `genesis.json` into the target directory.
#[derive(Debug, Args)]
pub struct InitCmd {
    /// Directory receiving the configuration files.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite existing files.
    #[arg(long)]
    pub force: bool,
}

impl InitCmd {
    /// Runs the command.
    pub fn run(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir).context("create target directory")?;

        let config_path = self.dir.join("lattice.toml");
        let genesis_path = self.dir.join("genesis.json");
        if !self.force && (config_path.exists() || genesis_path.exists()) {
            anyhow::bail!("configuration already exists; use --force to overwrite");
        }

        Config::default().save(&config_path)?;
        GenesisConfig::default().save_json(&genesis_path)?;
        info!(dir = %self.dir.display(), "wrote lattice.toml and genesis.json");
        Ok(())
    }
}
