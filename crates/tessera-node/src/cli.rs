use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tessera - A replicated round-based agent service
#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera ABCI application node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a Tessera node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Number of agents to generate for the participant set
        #[arg(long, default_value = "4")]
        agents: usize,
    },

    /// Generate a new agent keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show node status
    Status {
        /// Status endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,
    },
}
