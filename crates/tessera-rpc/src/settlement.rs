//! Registry chain transaction settlement with a bounded retry policy.
//!
//! Every interaction is retried at most `retries` times and never past
//! `timeout`. Errors are classified per attempt: transient ones retry the
//! same request, fee and nonce rejections retry with a bumped fee, anything
//! else fails immediately.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::SettlementError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(3);

const REPRICE_ERRORS: [&str; 3] = ["FeeTooLow", "underpriced", "nonce too low"];
const TRANSIENT_ERRORS: [&str; 2] = ["wrong transaction nonce", "temporarily unavailable"];
const FEE_FIELDS: [&str; 3] = ["gasPrice", "maxFeePerGas", "maxPriorityFeePerGas"];

/// Error reported by a chain client for a single call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Rpc(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetrySame,
    Reprice,
    Fatal,
}

pub fn classify(error: &ClientError) -> RetryAction {
    let message = match error {
        ClientError::Connection(_) => return RetryAction::RetrySame,
        ClientError::Rpc(message) => message,
    };
    if REPRICE_ERRORS.iter().any(|e| message.contains(e)) {
        RetryAction::Reprice
    } else if TRANSIENT_ERRORS.iter().any(|e| message.contains(e)) {
        RetryAction::RetrySame
    } else {
        RetryAction::Fatal
    }
}

/// Raise every fee field present in `request` by 10%, capped at the type maximum
pub fn reprice(request: &mut Value) {
    let Some(object) = request.as_object_mut() else {
        return;
    };
    for field in FEE_FIELDS {
        let Some(value) = object.get_mut(field) else {
            continue;
        };
        let bumped = match value {
            Value::Number(n) => n.as_u64().map(|fee| json!(fee.saturating_add(fee / 10))),
            Value::String(s) => s
                .strip_prefix("0x")
                .and_then(|hex| u128::from_str_radix(hex, 16).ok())
                .map(|fee| json!(format!("0x{:x}", fee.saturating_add(fee / 10)))),
            _ => None,
        };
        if let Some(bumped) = bumped {
            *value = bumped;
        }
    }
}

/// Chain access used by [`TxSettler`]
pub trait SettlementClient: Send + Sync {
    /// Fill in a transaction request; `None` means not ready yet
    fn build(&self, request: &Value)
        -> impl Future<Output = Result<Option<Value>, ClientError>> + Send;

    /// Submit a transaction and return its digest
    fn send(&self, tx: &Value) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Receipt of a submitted transaction; `None` while pending
    fn receipt(&self, digest: &str)
        -> impl Future<Output = Result<Option<Value>, ClientError>> + Send;
}

#[derive(Debug, Deserialize)]
struct JsonRpcReply {
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client over HTTP
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        JsonRpcClient {
            client: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ClientError::Connection(e.to_string())
                } else {
                    ClientError::Rpc(e.to_string())
                }
            })?;
        let reply: JsonRpcReply = response
            .json()
            .await
            .map_err(|e| ClientError::Rpc(format!("invalid JSON-RPC reply: {}", e)))?;

        if let Some(error) = reply.error {
            debug!(method, code = error.code, "JSON-RPC error: {}", error.message);
            return Err(ClientError::Rpc(error.message));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

impl SettlementClient for JsonRpcClient {
    async fn build(&self, request: &Value) -> Result<Option<Value>, ClientError> {
        let result = self.call("eth_fillTransaction", json!([request])).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(result.get("tx").cloned().unwrap_or(result)))
    }

    async fn send(&self, tx: &Value) -> Result<String, ClientError> {
        let result = self.call("eth_sendTransaction", json!([tx])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Rpc("missing transaction hash in reply".to_string()))
    }

    async fn receipt(&self, digest: &str) -> Result<Option<Value>, ClientError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([digest]))
            .await?;
        Ok((!result.is_null()).then_some(result))
    }
}

/// Builds, sends and waits for registry chain transactions
pub struct TxSettler<C: SettlementClient> {
    client: C,
    timeout: Duration,
    retries: u32,
    sleep: Duration,
}

impl<C: SettlementClient> TxSettler<C> {
    pub fn new(client: C) -> Self {
        TxSettler {
            client,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            sleep: DEFAULT_SLEEP,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Build a transaction from `request`, repricing on fee rejections
    pub async fn build(&self, mut request: Value) -> Result<Value, SettlementError> {
        let deadline = Instant::now() + self.timeout;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < self.retries && Instant::now() <= deadline {
            attempts += 1;
            match self.client.build(&request).await {
                Ok(Some(tx)) => return Ok(tx),
                Ok(None) => debug!(attempts, "transaction not ready yet"),
                Err(e) => match classify(&e) {
                    RetryAction::Fatal => return Err(SettlementError::Build(e.to_string())),
                    action => {
                        warn!(
                            "Error occured when interacting with chain: {}; will retry in {:?}...",
                            e, self.sleep
                        );
                        if action == RetryAction::Reprice {
                            reprice(&mut request);
                        }
                        last_error = Some(e.to_string());
                    }
                },
            }
            sleep(self.sleep).await;
        }

        Err(SettlementError::Timeout {
            context: "Timed out when building the transaction".to_string(),
            last_error,
        })
    }

    /// Send `tx` and wait for its receipt
    pub async fn transact(&self, tx: &Value) -> Result<Value, SettlementError> {
        let digest = self.client.send(tx).await.map_err(|e| match e {
            ClientError::Connection(msg) => SettlementError::Rpc(msg),
            ClientError::Rpc(msg) => SettlementError::Send(msg),
        })?;
        info!(digest = %digest, "transaction sent");

        let deadline = Instant::now() + self.timeout;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < self.retries && Instant::now() <= deadline {
            attempts += 1;
            match self.client.receipt(&digest).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => last_error = Some(e.to_string()),
            }
            sleep(self.sleep).await;
        }

        Err(SettlementError::Timeout {
            context: "Timed out when waiting for transaction to go through".to_string(),
            last_error,
        })
    }

    pub async fn settle(&self, request: Value) -> Result<Value, SettlementError> {
        let tx = self.build(request).await?;
        self.transact(&tx).await
    }
}
