use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod app;
mod cli;
mod config;
mod handler;
mod node;
mod tendermint;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Node;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .pretty()
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }
        Commands::Init { output, agents } => {
            init_logging("info");
            init_config(output, agents)?;
        }
        Commands::Keygen { output } => {
            init_logging("info");
            generate_keypair(output)?;
        }
        Commands::Status { endpoint } => {
            init_logging("info");
            show_status(&endpoint).await?;
        }
    }

    Ok(())
}

/// Run a Tessera node
async fn run_node(config_path: PathBuf) -> Result<()> {
    if !config_path.exists() {
        init_logging("info");
        error!(
            "Configuration file not found: {:?}. Run 'tessera init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }

    let config = NodeConfig::load(&config_path)?;
    init_logging(&config.log_level);
    info!("Loaded configuration from {:?}", config_path);

    let node = Node::new(config)?;
    node.run().await
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, agents: usize) -> Result<()> {
    info!("Generating sample configuration with {} agents", agents);

    let config = generate_sample_config(agents);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);
    if let Some(agent) = config.agent_keypair()? {
        info!("  Agent address: {}", agent.address());
    }

    println!("\nConfiguration file created: {}", output.display());
    println!("Only the first participant's key is stored; set agent_key per node.");
    println!("\nTo start the node, run:");
    println!("  tessera run --config {}", output.display());

    Ok(())
}

/// Generate a new agent keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = tessera_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Address:     {}", keypair.address());
    println!("  Public key:  {}", keypair.public.address());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Show node status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint.trim_end_matches('/'));

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: serde_json::Value = response.json().await?;
        println!("Node Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}
