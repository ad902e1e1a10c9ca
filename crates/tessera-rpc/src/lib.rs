//! Tessera RPC - Status service and registry chain settlement
//!
//! This crate provides the read-only HTTP status and healthcheck service of
//! a node, and the transaction settlement helper used to talk to the
//! registry chain.

pub mod error;
pub mod http;
pub mod settlement;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use http::{create_router, AppState};

pub use error::{RpcError, SettlementError};
pub use http::{HealthResponse, StatusHandle};
pub use settlement::{
    classify, ClientError, JsonRpcClient, RetryAction, SettlementClient, TxSettler,
};

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP bind address
    pub http_addr: SocketAddr,
    /// Age after which the last round transition counts as stalled
    pub max_transition_age: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_transition_age: Duration::from_secs(120),
        }
    }
}

/// Read-only status server
pub struct RpcServer {
    config: RpcConfig,
    app_state: Arc<AppState>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, status: StatusHandle) -> Self {
        let app_state = Arc::new(AppState {
            status,
            max_transition_age: config.max_transition_age,
        });
        RpcServer { config, app_state }
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.app_state))
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = self.config.http_addr;

        info!("Starting RPC server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}
