//! Lattice node binary.

use clap::{Parser, Subcommand};
use lattice::commands::{init::InitCmd, start::StartCmd};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lattice", about = "Lattice permissioned ledger node", version)]
struct Cli {
    /// Tracing filter, e.g. `info` or `lattice=debug`.
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a default configuration and genesis document.
    Init(InitCmd),
    /// Run the node.
    Start(StartCmd),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    match cli.command {
        Command::Init(cmd) => cmd.run(),
        Command::Start(cmd) => cmd.run(),
    }
}
