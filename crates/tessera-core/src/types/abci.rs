//! Internal representation of the ABCI block lifecycle messages.
//!
//! These mirror the consensus engine's wire schema field for field, but use
//! plain Rust types: byte strings are `Vec<u8>`, wire enumerations are closed
//! enums and nested messages that may be absent on the wire stay `Option`.

use serde::{Deserialize, Serialize};

use crate::types::timestamp::Timestamp;

/// Result code for an accepted transaction or call
pub const OK_CODE: u32 = 0;
/// Result code for a rejected transaction or unsupported call
pub const ERROR_CODE: u32 = 1;

/// A signed span of time (`google.protobuf.Duration`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Interval {
    pub seconds: i64,
    pub nanos: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockParams {
    pub max_bytes: i64,
    pub max_gas: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvidenceParams {
    pub max_age_num_blocks: i64,
    pub max_age_duration: Option<Interval>,
    pub max_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorParams {
    pub pub_key_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionParams {
    pub app_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block: Option<BlockParams>,
    pub evidence: Option<EvidenceParams>,
    pub validator: Option<ValidatorParams>,
    pub version: Option<VersionParams>,
}

/// A validator as referenced by address in commit info and evidence
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validator {
    pub address: Vec<u8>,
    pub power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorKey {
    Ed25519(Vec<u8>),
    Secp256k1(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: Option<ValidatorKey>,
    pub power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteInfo {
    pub validator: Option<Validator>,
    pub signed_last_block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastCommitInfo {
    pub round: i32,
    pub votes: Vec<VoteInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvidenceKind {
    #[default]
    Unknown,
    DuplicateVote,
    LightClientAttack,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub validator: Option<Validator>,
    pub height: i64,
    pub time: Option<Timestamp>,
    pub total_voting_power: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsensusVersion {
    pub block: u64,
    pub app: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Vec<u8>,
    pub part_set_header: Option<PartSetHeader>,
}

/// The consensus engine's block header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    pub version: Option<ConsensusVersion>,
    pub chain_id: String,
    pub height: i64,
    pub time: Option<Timestamp>,
    pub last_block_id: Option<BlockId>,
    pub last_commit_hash: Vec<u8>,
    pub data_hash: Vec<u8>,
    pub validators_hash: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
    pub consensus_hash: Vec<u8>,
    pub app_hash: Vec<u8>,
    pub last_results_hash: Vec<u8>,
    pub evidence_hash: Vec<u8>,
    pub proposer_address: Vec<u8>,
}

impl Header {
    /// Block time, or the epoch when the engine left it unset
    pub fn timestamp(&self) -> Timestamp {
        self.time.unwrap_or(Timestamp::EPOCH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: u64,
    pub format: u32,
    pub chunks: u32,
    pub hash: Vec<u8>,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProofOp {
    pub kind: String,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProofOps {
    pub ops: Vec<ProofOp>,
}

// Requests

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestEcho {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInfo {
    pub version: String,
    pub block_version: u64,
    pub p2p_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestSetOption {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInitChain {
    pub time: Option<Timestamp>,
    pub chain_id: String,
    pub consensus_params: Option<ConsensusParams>,
    pub validators: Vec<ValidatorUpdate>,
    pub app_state_bytes: Vec<u8>,
    pub initial_height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    pub height: i64,
    pub prove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestBeginBlock {
    pub hash: Vec<u8>,
    pub header: Option<Header>,
    pub last_commit_info: Option<LastCommitInfo>,
    pub byzantine_validators: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckTxKind {
    #[default]
    New,
    Recheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
    pub kind: CheckTxKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestDeliverTx {
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestEndBlock {
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestOfferSnapshot {
    pub snapshot: Option<Snapshot>,
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestLoadSnapshotChunk {
    pub height: u64,
    pub format: u32,
    pub chunk: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestApplySnapshotChunk {
    pub index: u32,
    pub chunk: Vec<u8>,
    pub sender: String,
}

/// Every request the consensus engine can issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbciRequest {
    Echo(RequestEcho),
    Flush,
    Info(RequestInfo),
    SetOption(RequestSetOption),
    InitChain(RequestInitChain),
    Query(RequestQuery),
    BeginBlock(RequestBeginBlock),
    CheckTx(RequestCheckTx),
    DeliverTx(RequestDeliverTx),
    EndBlock(RequestEndBlock),
    Commit,
    ListSnapshots,
    OfferSnapshot(RequestOfferSnapshot),
    LoadSnapshotChunk(RequestLoadSnapshotChunk),
    ApplySnapshotChunk(RequestApplySnapshotChunk),
}

impl AbciRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            AbciRequest::Echo(_) => "echo",
            AbciRequest::Flush => "flush",
            AbciRequest::Info(_) => "info",
            AbciRequest::SetOption(_) => "set_option",
            AbciRequest::InitChain(_) => "init_chain",
            AbciRequest::Query(_) => "query",
            AbciRequest::BeginBlock(_) => "begin_block",
            AbciRequest::CheckTx(_) => "check_tx",
            AbciRequest::DeliverTx(_) => "deliver_tx",
            AbciRequest::EndBlock(_) => "end_block",
            AbciRequest::Commit => "commit",
            AbciRequest::ListSnapshots => "list_snapshots",
            AbciRequest::OfferSnapshot(_) => "offer_snapshot",
            AbciRequest::LoadSnapshotChunk(_) => "load_snapshot_chunk",
            AbciRequest::ApplySnapshotChunk(_) => "apply_snapshot_chunk",
        }
    }
}

// Responses

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseException {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseEcho {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseInfo {
    pub data: String,
    pub version: String,
    pub app_version: u64,
    pub last_block_height: i64,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseSetOption {
    pub code: u32,
    pub log: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseInitChain {
    pub consensus_params: Option<ConsensusParams>,
    pub validators: Vec<ValidatorUpdate>,
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    pub info: String,
    pub index: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub proof_ops: Option<ProofOps>,
    pub height: i64,
    pub codespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseBeginBlock {
    pub events: Vec<Event>,
}

/// Outcome of `check_tx` and `deliver_tx`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub info: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
    pub codespace: String,
}

impl ResponseTx {
    pub fn ok() -> Self {
        ResponseTx {
            code: OK_CODE,
            ..Default::default()
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        ResponseTx {
            code: ERROR_CODE,
            info: info.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub consensus_param_updates: Option<ConsensusParams>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseCommit {
    pub data: Vec<u8>,
    pub retain_height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseListSnapshots {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfferSnapshotResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Reject,
    RejectFormat,
    RejectSender,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseOfferSnapshot {
    pub result: OfferSnapshotResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseLoadSnapshotChunk {
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplySnapshotChunkResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Retry,
    RetrySnapshot,
    RejectSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseApplySnapshotChunk {
    pub result: ApplySnapshotChunkResult,
    pub refetch_chunks: Vec<u32>,
    pub reject_senders: Vec<String>,
}

/// Every response the application can send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbciResponse {
    Exception(ResponseException),
    Echo(ResponseEcho),
    Flush,
    Info(ResponseInfo),
    SetOption(ResponseSetOption),
    InitChain(ResponseInitChain),
    Query(ResponseQuery),
    BeginBlock(ResponseBeginBlock),
    CheckTx(ResponseTx),
    DeliverTx(ResponseTx),
    EndBlock(ResponseEndBlock),
    Commit(ResponseCommit),
    ListSnapshots(ResponseListSnapshots),
    OfferSnapshot(ResponseOfferSnapshot),
    LoadSnapshotChunk(ResponseLoadSnapshotChunk),
    ApplySnapshotChunk(ResponseApplySnapshotChunk),
}

impl AbciResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            AbciResponse::Exception(_) => "exception",
            AbciResponse::Echo(_) => "echo",
            AbciResponse::Flush => "flush",
            AbciResponse::Info(_) => "info",
            AbciResponse::SetOption(_) => "set_option",
            AbciResponse::InitChain(_) => "init_chain",
            AbciResponse::Query(_) => "query",
            AbciResponse::BeginBlock(_) => "begin_block",
            AbciResponse::CheckTx(_) => "check_tx",
            AbciResponse::DeliverTx(_) => "deliver_tx",
            AbciResponse::EndBlock(_) => "end_block",
            AbciResponse::Commit(_) => "commit",
            AbciResponse::ListSnapshots(_) => "list_snapshots",
            AbciResponse::OfferSnapshot(_) => "offer_snapshot",
            AbciResponse::LoadSnapshotChunk(_) => "load_snapshot_chunk",
            AbciResponse::ApplySnapshotChunk(_) => "apply_snapshot_chunk",
        }
    }
}
