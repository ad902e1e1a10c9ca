use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tessera_core::Timestamp;
use tessera_rounds::SequenceStatus;
use tokio::sync::watch;

use crate::error::RpcError;

/// Snapshot published by the node after every commit
pub type StatusHandle = watch::Receiver<SequenceStatus>;

/// Application state shared with handlers
pub struct AppState {
    pub status: StatusHandle,
    /// Transitions older than this mark the service as stalled
    pub max_transition_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub is_healthy: bool,
    pub is_transitioning_fast: bool,
    pub seconds_since_last_transition: Option<u64>,
    pub height: u64,
    pub round: Option<String>,
    pub period: u64,
}

/// GET /status - Current round sequence snapshot
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SequenceStatus>, RpcError> {
    let status = state.status.borrow().clone();
    Ok(Json(status))
}

/// GET /healthcheck - Whether rounds keep moving
pub async fn get_healthcheck(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, RpcError> {
    let status = state.status.borrow().clone();
    Ok(Json(health(&status, Timestamp::now(), state.max_transition_age)))
}

pub(crate) fn health(status: &SequenceStatus, now: Timestamp, max_age: Duration) -> HealthResponse {
    let seconds_since_last_transition = status
        .last_transition_timestamp
        .map(|last| now.secs_since(&last));
    let is_transitioning_fast =
        seconds_since_last_transition.is_some_and(|secs| secs < max_age.as_secs());

    HealthResponse {
        is_healthy: !status.is_finished && status.round.is_some(),
        is_transitioning_fast,
        seconds_since_last_transition,
        height: status.height,
        round: status.round.clone(),
        period: status.period,
    }
}
