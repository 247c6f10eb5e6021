use std::path::PathBuf;

use clap::{Parser, Subcommand};
use saltbox_deploy::{CONFIG_FILENAME, DEPLOYER_ROLE};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "saltbox")]
#[command(
    version,
    about = "Deterministic CREATE2 contract deployments",
    long_about = "Deploys contracts at addresses derived from a salt and their init code. \
                  Contracts already present on chain are never deployed twice."
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SALTBOX_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or a directory containing it.
    #[arg(short, long, alias = "conf", env = "SALTBOX_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Selects the unit to deploy.
#[derive(Debug, Clone, clap::Args)]
pub struct Target {
    /// Network name. Defaults to `default_network` from the configuration.
    #[arg(short, long, env = "SALTBOX_NETWORK")]
    pub network: Option<String>,

    /// Salt as hex, left-padded to 32 bytes.
    #[arg(short, long, default_value = "0x0")]
    pub salt: String,

    /// Named account role used as deployer.
    #[arg(long, default_value = DEPLOYER_ROLE)]
    pub account: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a starter configuration for a local dev node.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Deploy contracts unless they are already present.
    Deploy {
        /// Contract names, resolved in the artifacts directory.
        #[arg(required = true)]
        contracts: Vec<String>,

        #[command(flatten)]
        target: Target,

        /// Ignore previous ledger entries.
        #[arg(long)]
        force: bool,
    },

    /// Print the address a contract would be deployed to. No network access.
    Address {
        contract: String,

        #[command(flatten)]
        target: Target,
    },

    /// List the accounts configured for a network.
    Accounts {
        #[arg(short, long, env = "SALTBOX_NETWORK")]
        network: Option<String>,
    },

    /// Show the ledger history of a deployment.
    History {
        contract: String,

        #[command(flatten)]
        target: Target,
    },
}
