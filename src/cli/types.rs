//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vpn-tuner")]
#[command(about = "vpn-tuner - closed-loop network tuning for VPN servers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .vpn-tuner/config.yaml and local.yaml)
    #[arg(short, long, global = true, env = "VPN_TUNER_CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an optimization session against the configured host
    Optimize(OptimizeArgs),

    /// Run a single measurement pass and print the probe results
    Measure,

    /// Inspect the experiment history
    #[command(subcommand)]
    Experiments(ExperimentCommands),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug, Clone, Default)]
pub struct OptimizeArgs {
    /// Override optimizer.max_experiments
    #[arg(short, long)]
    pub max_experiments: Option<u32>,

    /// Simulate the host and the oracle; nothing is contacted or persisted
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExperimentCommands {
    /// List all experiments in run order
    List,

    /// Show the highest-scoring experiments
    Best {
        /// Maximum number of experiments to display
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show the first recorded experiment
    Baseline,

    /// Count stored experiments
    Count,

    /// Delete every stored experiment
    Clear,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration (secrets redacted)
    Show,
}
