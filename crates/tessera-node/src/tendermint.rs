//! Consensus engine run as a child of the node

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::TendermintConfig;

pub struct TendermintNode {
    config: TendermintConfig,
    proxy_app: SocketAddr,
    child: Option<Child>,
}

impl TendermintNode {
    pub fn new(config: TendermintConfig, proxy_app: SocketAddr) -> Self {
        TendermintNode {
            config,
            proxy_app,
            child: None,
        }
    }

    fn init_args(&self) -> Vec<String> {
        vec![
            "init".to_string(),
            "--home".to_string(),
            self.config.home.display().to_string(),
        ]
    }

    fn node_args(&self) -> Vec<String> {
        vec![
            "node".to_string(),
            "--home".to_string(),
            self.config.home.display().to_string(),
            format!("--proxy_app=tcp://{}", self.proxy_app),
            format!("--p2p.laddr=tcp://0.0.0.0:{}", self.config.p2p_port),
            format!("--rpc.laddr=tcp://0.0.0.0:{}", self.config.rpc_port),
        ]
    }

    /// Initialize the engine home, then spawn the engine
    pub async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let status = Command::new(&self.config.binary)
            .args(self.init_args())
            .stdout(Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.config.binary.display()))?;
        if !status.success() {
            bail!("consensus engine init exited with {}", status);
        }

        let child = Command::new(&self.config.binary)
            .args(self.node_args())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.config.binary.display()))?;
        info!(
            pid = child.id(),
            proxy_app = %self.proxy_app,
            "consensus engine started"
        );
        self.child = Some(child);
        Ok(())
    }

    /// SIGTERM, then kill once the grace period is over
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(status) = child.try_wait()? {
            info!("consensus engine already exited with {}", status);
            return Ok(());
        }

        terminate(&child);
        let grace = Duration::from_secs(self.config.stop_grace_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => info!("consensus engine stopped with {}", status?),
            Err(_) => {
                warn!("consensus engine ignored SIGTERM for {:?}, killing", grace);
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not yet reaped
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}
