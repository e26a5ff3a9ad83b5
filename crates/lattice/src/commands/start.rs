//! `lattice start` - run the node.

use crate::Node;
use anyhow::Context;
use clap::Args;
use lattice_config::{Config, GenesisConfig};
use std::path::PathBuf;
use tracing::info;

/// Starts the node from a configuration file.
#[derive(Debug, Args)]
pub struct StartCmd {
    /// Path to `lattice.toml`.
    #[arg(long, default_value = "lattice.toml")]
    pub config: PathBuf,

    /// Path to `genesis.json`.
    #[arg(long, default_value = "genesis.json")]
    pub genesis: PathBuf,
}

impl StartCmd {
    /// Runs the command; blocks until the process is terminated.
    pub fn run(&self) -> anyhow::Result<()> {
        let config = Config::load(&self.config).context("load configuration")?;
        let genesis = GenesisConfig::load_json(&self.genesis).context("load genesis")?;

        let node = Node::build(&config, &genesis)?;
        node.start();
        info!(
            height = node.ledger().height()?,
            "node running; press ctrl-c to stop"
        );

        loop {
            std::thread::park();
        }
    }
}
