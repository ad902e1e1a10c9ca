use std::time::Duration;

use anyhow::Result;
use tessera_abci::{serve, TcpChannel};
use tessera_core::KeyPair;
use tessera_rounds::{RoundSequence, SequenceStatus};
use tessera_rpc::{RpcConfig, RpcServer};
use tessera_state::FileStorage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app;
use crate::config::NodeConfig;
use crate::handler::RoundHandler;
use crate::tendermint::TendermintNode;

/// The Tessera node
pub struct Node {
    config: NodeConfig,
    agent: Option<KeyPair>,
    sequence: RoundSequence<FileStorage>,
}

impl Node {
    /// Build the application and restore the last checkpoint
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let agent = config.agent_keypair()?;

        std::fs::create_dir_all(&config.data_dir)?;
        let storage = FileStorage::open(config.storage_path())?;
        let mut sequence =
            RoundSequence::new(app::build(&config)?, storage, config.sequence_config());
        if sequence.recover()? {
            info!(
                height = sequence.height(),
                round = ?sequence.current_round_id(),
                "restored from checkpoint"
            );
        } else {
            sequence.setup()?;
        }

        Ok(Node {
            config,
            agent,
            sequence,
        })
    }

    pub fn status(&self) -> SequenceStatus {
        self.sequence.status()
    }

    /// Serve the consensus engine until interrupted
    pub async fn run(self) -> Result<()> {
        let status = self.status();
        info!(
            height = status.height,
            period = status.period,
            round = status.round.as_deref().unwrap_or("none"),
            "starting node"
        );
        let Node {
            config,
            agent,
            sequence,
        } = self;

        match &agent {
            Some(agent) if config.setup.participants.contains(&agent.address()) => {
                info!("Running as agent {}", agent.address());
            }
            Some(agent) => warn!("Agent {} is not a participant", agent.address()),
            None => warn!("No agent key configured"),
        }

        let shutdown = CancellationToken::new();
        let (publisher, status) = watch::channel(sequence.status());
        let mut handler = RoundHandler::new(sequence, publisher);

        let rpc_server = RpcServer::new(
            RpcConfig {
                http_addr: config.rpc_addr,
                max_transition_age: Duration::from_secs(config.round_timeout_secs * 4),
            },
            status,
        );
        let rpc_handle = tokio::spawn(rpc_server.run(shutdown.clone()));

        let mut channel = TcpChannel::new(config.abci_addr);
        let abci_addr = channel.connect().await?;

        let mut companion = match config.tendermint.clone() {
            Some(tendermint) => {
                let mut companion = TendermintNode::new(tendermint, abci_addr);
                companion.start().await?;
                Some(companion)
            }
            None => None,
        };

        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
            }
            interrupt.cancel();
        });

        let served = serve(&mut channel, &mut handler, shutdown.clone()).await;
        shutdown.cancel();

        if let Err(e) = channel.disconnect().await {
            warn!("ABCI channel disconnect failed: {}", e);
        }
        if let Some(companion) = companion.as_mut() {
            companion.stop().await?;
        }
        match rpc_handle.await {
            Ok(Err(e)) => error!("RPC server error: {}", e),
            Err(e) => error!("RPC server task failed: {}", e),
            Ok(Ok(())) => {}
        }

        served?;
        info!(height = handler.sequence().height(), "node stopped");
        Ok(())
    }
}
