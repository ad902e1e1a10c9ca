//! Bidirectional mapping between wire messages and [`AbciRequest`]/[`AbciResponse`].
//!
//! Every field of every declared kind is carried across, nested composites
//! included. An envelope without a recognised value, or carrying an enum
//! value outside its declared range, is reported as [`NoMatch`] so the
//! caller can log it and move on.

use tessera_core::types::abci::*;
use tessera_core::Timestamp;

use crate::wire;
use crate::wire::{request, response};

/// The wire envelope carried no value this translator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoMatch;

/// Translate an engine request into its internal form
pub fn decode_request(message: wire::Request) -> Result<AbciRequest, NoMatch> {
    let value = message.value.ok_or(NoMatch)?;
    let request = match value {
        request::Value::Echo(r) => AbciRequest::Echo(RequestEcho { message: r.message }),
        request::Value::Flush(_) => AbciRequest::Flush,
        request::Value::Info(r) => AbciRequest::Info(RequestInfo {
            version: r.version,
            block_version: r.block_version,
            p2p_version: r.p2p_version,
        }),
        request::Value::SetOption(r) => AbciRequest::SetOption(RequestSetOption {
            key: r.key,
            value: r.value,
        }),
        request::Value::InitChain(r) => AbciRequest::InitChain(RequestInitChain {
            time: r.time.map(Into::into),
            chain_id: r.chain_id,
            consensus_params: r.consensus_params.map(Into::into),
            validators: r.validators.into_iter().map(Into::into).collect(),
            app_state_bytes: r.app_state_bytes,
            initial_height: r.initial_height,
        }),
        request::Value::Query(r) => AbciRequest::Query(RequestQuery {
            data: r.data,
            path: r.path,
            height: r.height,
            prove: r.prove,
        }),
        request::Value::BeginBlock(r) => AbciRequest::BeginBlock(RequestBeginBlock {
            hash: r.hash,
            header: r.header.map(Into::into),
            last_commit_info: r.last_commit_info.map(Into::into),
            byzantine_validators: r.byzantine_validators.into_iter().map(Into::into).collect(),
        }),
        request::Value::CheckTx(r) => AbciRequest::CheckTx(RequestCheckTx {
            tx: r.tx,
            kind: match wire::CheckTxType::try_from(r.r#type).map_err(|_| NoMatch)? {
                wire::CheckTxType::New => CheckTxKind::New,
                wire::CheckTxType::Recheck => CheckTxKind::Recheck,
            },
        }),
        request::Value::DeliverTx(r) => AbciRequest::DeliverTx(RequestDeliverTx { tx: r.tx }),
        request::Value::EndBlock(r) => AbciRequest::EndBlock(RequestEndBlock { height: r.height }),
        request::Value::Commit(_) => AbciRequest::Commit,
        request::Value::ListSnapshots(_) => AbciRequest::ListSnapshots,
        request::Value::OfferSnapshot(r) => AbciRequest::OfferSnapshot(RequestOfferSnapshot {
            snapshot: r.snapshot.map(Into::into),
            app_hash: r.app_hash,
        }),
        request::Value::LoadSnapshotChunk(r) => {
            AbciRequest::LoadSnapshotChunk(RequestLoadSnapshotChunk {
                height: r.height,
                format: r.format,
                chunk: r.chunk,
            })
        }
        request::Value::ApplySnapshotChunk(r) => {
            AbciRequest::ApplySnapshotChunk(RequestApplySnapshotChunk {
                index: r.index,
                chunk: r.chunk,
                sender: r.sender,
            })
        }
    };
    Ok(request)
}

/// Translate an internal request back into a wire envelope
pub fn encode_request(request: AbciRequest) -> wire::Request {
    let value = match request {
        AbciRequest::Echo(r) => request::Value::Echo(wire::RequestEcho { message: r.message }),
        AbciRequest::Flush => request::Value::Flush(wire::RequestFlush {}),
        AbciRequest::Info(r) => request::Value::Info(wire::RequestInfo {
            version: r.version,
            block_version: r.block_version,
            p2p_version: r.p2p_version,
        }),
        AbciRequest::SetOption(r) => request::Value::SetOption(wire::RequestSetOption {
            key: r.key,
            value: r.value,
        }),
        AbciRequest::InitChain(r) => request::Value::InitChain(wire::RequestInitChain {
            time: r.time.map(Into::into),
            chain_id: r.chain_id,
            consensus_params: r.consensus_params.map(Into::into),
            validators: r.validators.into_iter().map(Into::into).collect(),
            app_state_bytes: r.app_state_bytes,
            initial_height: r.initial_height,
        }),
        AbciRequest::Query(r) => request::Value::Query(wire::RequestQuery {
            data: r.data,
            path: r.path,
            height: r.height,
            prove: r.prove,
        }),
        AbciRequest::BeginBlock(r) => request::Value::BeginBlock(wire::RequestBeginBlock {
            hash: r.hash,
            header: r.header.map(Into::into),
            last_commit_info: r.last_commit_info.map(Into::into),
            byzantine_validators: r.byzantine_validators.into_iter().map(Into::into).collect(),
        }),
        AbciRequest::CheckTx(r) => request::Value::CheckTx(wire::RequestCheckTx {
            tx: r.tx,
            r#type: match r.kind {
                CheckTxKind::New => wire::CheckTxType::New,
                CheckTxKind::Recheck => wire::CheckTxType::Recheck,
            } as i32,
        }),
        AbciRequest::DeliverTx(r) => request::Value::DeliverTx(wire::RequestDeliverTx { tx: r.tx }),
        AbciRequest::EndBlock(r) => {
            request::Value::EndBlock(wire::RequestEndBlock { height: r.height })
        }
        AbciRequest::Commit => request::Value::Commit(wire::RequestCommit {}),
        AbciRequest::ListSnapshots => request::Value::ListSnapshots(wire::RequestListSnapshots {}),
        AbciRequest::OfferSnapshot(r) => {
            request::Value::OfferSnapshot(wire::RequestOfferSnapshot {
                snapshot: r.snapshot.map(Into::into),
                app_hash: r.app_hash,
            })
        }
        AbciRequest::LoadSnapshotChunk(r) => {
            request::Value::LoadSnapshotChunk(wire::RequestLoadSnapshotChunk {
                height: r.height,
                format: r.format,
                chunk: r.chunk,
            })
        }
        AbciRequest::ApplySnapshotChunk(r) => {
            request::Value::ApplySnapshotChunk(wire::RequestApplySnapshotChunk {
                index: r.index,
                chunk: r.chunk,
                sender: r.sender,
            })
        }
    };
    wire::Request { value: Some(value) }
}

/// Translate an internal response into a wire envelope
pub fn encode_response(response: AbciResponse) -> wire::Response {
    let value = match response {
        AbciResponse::Exception(r) => {
            response::Value::Exception(wire::ResponseException { error: r.error })
        }
        AbciResponse::Echo(r) => response::Value::Echo(wire::ResponseEcho { message: r.message }),
        AbciResponse::Flush => response::Value::Flush(wire::ResponseFlush {}),
        AbciResponse::Info(r) => response::Value::Info(wire::ResponseInfo {
            data: r.data,
            version: r.version,
            app_version: r.app_version,
            last_block_height: r.last_block_height,
            last_block_app_hash: r.last_block_app_hash,
        }),
        AbciResponse::SetOption(r) => response::Value::SetOption(wire::ResponseSetOption {
            code: r.code,
            log: r.log,
            info: r.info,
        }),
        AbciResponse::InitChain(r) => response::Value::InitChain(wire::ResponseInitChain {
            consensus_params: r.consensus_params.map(Into::into),
            validators: r.validators.into_iter().map(Into::into).collect(),
            app_hash: r.app_hash,
        }),
        AbciResponse::Query(r) => response::Value::Query(wire::ResponseQuery {
            code: r.code,
            log: r.log,
            info: r.info,
            index: r.index,
            key: r.key,
            value: r.value,
            proof_ops: r.proof_ops.map(Into::into),
            height: r.height,
            codespace: r.codespace,
        }),
        AbciResponse::BeginBlock(r) => response::Value::BeginBlock(wire::ResponseBeginBlock {
            events: r.events.into_iter().map(Into::into).collect(),
        }),
        AbciResponse::CheckTx(r) => response::Value::CheckTx(wire::ResponseCheckTx {
            code: r.code,
            data: r.data,
            log: r.log,
            info: r.info,
            gas_wanted: r.gas_wanted,
            gas_used: r.gas_used,
            events: r.events.into_iter().map(Into::into).collect(),
            codespace: r.codespace,
        }),
        AbciResponse::DeliverTx(r) => response::Value::DeliverTx(wire::ResponseDeliverTx {
            code: r.code,
            data: r.data,
            log: r.log,
            info: r.info,
            gas_wanted: r.gas_wanted,
            gas_used: r.gas_used,
            events: r.events.into_iter().map(Into::into).collect(),
            codespace: r.codespace,
        }),
        AbciResponse::EndBlock(r) => response::Value::EndBlock(wire::ResponseEndBlock {
            validator_updates: r.validator_updates.into_iter().map(Into::into).collect(),
            consensus_param_updates: r.consensus_param_updates.map(Into::into),
            events: r.events.into_iter().map(Into::into).collect(),
        }),
        AbciResponse::Commit(r) => response::Value::Commit(wire::ResponseCommit {
            data: r.data,
            retain_height: r.retain_height,
        }),
        AbciResponse::ListSnapshots(r) => {
            response::Value::ListSnapshots(wire::ResponseListSnapshots {
                snapshots: r.snapshots.into_iter().map(Into::into).collect(),
            })
        }
        AbciResponse::OfferSnapshot(r) => {
            response::Value::OfferSnapshot(wire::ResponseOfferSnapshot {
                result: offer_result_to_wire(r.result) as i32,
            })
        }
        AbciResponse::LoadSnapshotChunk(r) => {
            response::Value::LoadSnapshotChunk(wire::ResponseLoadSnapshotChunk { chunk: r.chunk })
        }
        AbciResponse::ApplySnapshotChunk(r) => {
            response::Value::ApplySnapshotChunk(wire::ResponseApplySnapshotChunk {
                result: apply_result_to_wire(r.result) as i32,
                refetch_chunks: r.refetch_chunks,
                reject_senders: r.reject_senders,
            })
        }
    };
    wire::Response { value: Some(value) }
}

/// Translate a wire response into its internal form
pub fn decode_response(message: wire::Response) -> Result<AbciResponse, NoMatch> {
    let value = message.value.ok_or(NoMatch)?;
    let response = match value {
        response::Value::Exception(r) => {
            AbciResponse::Exception(ResponseException { error: r.error })
        }
        response::Value::Echo(r) => AbciResponse::Echo(ResponseEcho { message: r.message }),
        response::Value::Flush(_) => AbciResponse::Flush,
        response::Value::Info(r) => AbciResponse::Info(ResponseInfo {
            data: r.data,
            version: r.version,
            app_version: r.app_version,
            last_block_height: r.last_block_height,
            last_block_app_hash: r.last_block_app_hash,
        }),
        response::Value::SetOption(r) => AbciResponse::SetOption(ResponseSetOption {
            code: r.code,
            log: r.log,
            info: r.info,
        }),
        response::Value::InitChain(r) => AbciResponse::InitChain(ResponseInitChain {
            consensus_params: r.consensus_params.map(Into::into),
            validators: r.validators.into_iter().map(Into::into).collect(),
            app_hash: r.app_hash,
        }),
        response::Value::Query(r) => AbciResponse::Query(ResponseQuery {
            code: r.code,
            log: r.log,
            info: r.info,
            index: r.index,
            key: r.key,
            value: r.value,
            proof_ops: r.proof_ops.map(Into::into),
            height: r.height,
            codespace: r.codespace,
        }),
        response::Value::BeginBlock(r) => AbciResponse::BeginBlock(ResponseBeginBlock {
            events: r.events.into_iter().map(Into::into).collect(),
        }),
        response::Value::CheckTx(r) => AbciResponse::CheckTx(ResponseTx {
            code: r.code,
            data: r.data,
            log: r.log,
            info: r.info,
            gas_wanted: r.gas_wanted,
            gas_used: r.gas_used,
            events: r.events.into_iter().map(Into::into).collect(),
            codespace: r.codespace,
        }),
        response::Value::DeliverTx(r) => AbciResponse::DeliverTx(ResponseTx {
            code: r.code,
            data: r.data,
            log: r.log,
            info: r.info,
            gas_wanted: r.gas_wanted,
            gas_used: r.gas_used,
            events: r.events.into_iter().map(Into::into).collect(),
            codespace: r.codespace,
        }),
        response::Value::EndBlock(r) => AbciResponse::EndBlock(ResponseEndBlock {
            validator_updates: r.validator_updates.into_iter().map(Into::into).collect(),
            consensus_param_updates: r.consensus_param_updates.map(Into::into),
            events: r.events.into_iter().map(Into::into).collect(),
        }),
        response::Value::Commit(r) => AbciResponse::Commit(ResponseCommit {
            data: r.data,
            retain_height: r.retain_height,
        }),
        response::Value::ListSnapshots(r) => AbciResponse::ListSnapshots(ResponseListSnapshots {
            snapshots: r.snapshots.into_iter().map(Into::into).collect(),
        }),
        response::Value::OfferSnapshot(r) => AbciResponse::OfferSnapshot(ResponseOfferSnapshot {
            result: match wire::OfferSnapshotResult::try_from(r.result) {
                Ok(wire::OfferSnapshotResult::Accept) => OfferSnapshotResult::Accept,
                Ok(wire::OfferSnapshotResult::Abort) => OfferSnapshotResult::Abort,
                Ok(wire::OfferSnapshotResult::Reject) => OfferSnapshotResult::Reject,
                Ok(wire::OfferSnapshotResult::RejectFormat) => OfferSnapshotResult::RejectFormat,
                Ok(wire::OfferSnapshotResult::RejectSender) => OfferSnapshotResult::RejectSender,
                _ => OfferSnapshotResult::Unknown,
            },
        }),
        response::Value::LoadSnapshotChunk(r) => {
            AbciResponse::LoadSnapshotChunk(ResponseLoadSnapshotChunk { chunk: r.chunk })
        }
        response::Value::ApplySnapshotChunk(r) => {
            AbciResponse::ApplySnapshotChunk(ResponseApplySnapshotChunk {
                result: match wire::ApplySnapshotChunkResult::try_from(r.result) {
                    Ok(wire::ApplySnapshotChunkResult::Accept) => ApplySnapshotChunkResult::Accept,
                    Ok(wire::ApplySnapshotChunkResult::Abort) => ApplySnapshotChunkResult::Abort,
                    Ok(wire::ApplySnapshotChunkResult::Retry) => ApplySnapshotChunkResult::Retry,
                    Ok(wire::ApplySnapshotChunkResult::RetrySnapshot) => {
                        ApplySnapshotChunkResult::RetrySnapshot
                    }
                    Ok(wire::ApplySnapshotChunkResult::RejectSnapshot) => {
                        ApplySnapshotChunkResult::RejectSnapshot
                    }
                    _ => ApplySnapshotChunkResult::Unknown,
                },
                refetch_chunks: r.refetch_chunks,
                reject_senders: r.reject_senders,
            })
        }
    };
    Ok(response)
}

fn offer_result_to_wire(result: OfferSnapshotResult) -> wire::OfferSnapshotResult {
    match result {
        OfferSnapshotResult::Unknown => wire::OfferSnapshotResult::Unknown,
        OfferSnapshotResult::Accept => wire::OfferSnapshotResult::Accept,
        OfferSnapshotResult::Abort => wire::OfferSnapshotResult::Abort,
        OfferSnapshotResult::Reject => wire::OfferSnapshotResult::Reject,
        OfferSnapshotResult::RejectFormat => wire::OfferSnapshotResult::RejectFormat,
        OfferSnapshotResult::RejectSender => wire::OfferSnapshotResult::RejectSender,
    }
}

fn apply_result_to_wire(result: ApplySnapshotChunkResult) -> wire::ApplySnapshotChunkResult {
    match result {
        ApplySnapshotChunkResult::Unknown => wire::ApplySnapshotChunkResult::Unknown,
        ApplySnapshotChunkResult::Accept => wire::ApplySnapshotChunkResult::Accept,
        ApplySnapshotChunkResult::Abort => wire::ApplySnapshotChunkResult::Abort,
        ApplySnapshotChunkResult::Retry => wire::ApplySnapshotChunkResult::Retry,
        ApplySnapshotChunkResult::RetrySnapshot => wire::ApplySnapshotChunkResult::RetrySnapshot,
        ApplySnapshotChunkResult::RejectSnapshot => wire::ApplySnapshotChunkResult::RejectSnapshot,
    }
}

// Composite fields, both directions.

impl From<wire::Timestamp> for Timestamp {
    fn from(t: wire::Timestamp) -> Self {
        Timestamp {
            seconds: t.seconds,
            nanos: t.nanos,
        }
    }
}

impl From<Timestamp> for wire::Timestamp {
    fn from(t: Timestamp) -> Self {
        wire::Timestamp {
            seconds: t.seconds,
            nanos: t.nanos,
        }
    }
}

impl From<wire::Duration> for Interval {
    fn from(d: wire::Duration) -> Self {
        Interval {
            seconds: d.seconds,
            nanos: d.nanos,
        }
    }
}

impl From<Interval> for wire::Duration {
    fn from(d: Interval) -> Self {
        wire::Duration {
            seconds: d.seconds,
            nanos: d.nanos,
        }
    }
}

impl From<wire::ConsensusParams> for ConsensusParams {
    fn from(p: wire::ConsensusParams) -> Self {
        ConsensusParams {
            block: p.block.map(|b| BlockParams {
                max_bytes: b.max_bytes,
                max_gas: b.max_gas,
            }),
            evidence: p.evidence.map(|e| EvidenceParams {
                max_age_num_blocks: e.max_age_num_blocks,
                max_age_duration: e.max_age_duration.map(Into::into),
                max_bytes: e.max_bytes,
            }),
            validator: p.validator.map(|v| ValidatorParams {
                pub_key_types: v.pub_key_types,
            }),
            version: p.version.map(|v| VersionParams {
                app_version: v.app_version,
            }),
        }
    }
}

impl From<ConsensusParams> for wire::ConsensusParams {
    fn from(p: ConsensusParams) -> Self {
        wire::ConsensusParams {
            block: p.block.map(|b| wire::BlockParams {
                max_bytes: b.max_bytes,
                max_gas: b.max_gas,
            }),
            evidence: p.evidence.map(|e| wire::EvidenceParams {
                max_age_num_blocks: e.max_age_num_blocks,
                max_age_duration: e.max_age_duration.map(Into::into),
                max_bytes: e.max_bytes,
            }),
            validator: p.validator.map(|v| wire::ValidatorParams {
                pub_key_types: v.pub_key_types,
            }),
            version: p.version.map(|v| wire::VersionParams {
                app_version: v.app_version,
            }),
        }
    }
}

impl From<wire::Validator> for Validator {
    fn from(v: wire::Validator) -> Self {
        Validator {
            address: v.address,
            power: v.power,
        }
    }
}

impl From<Validator> for wire::Validator {
    fn from(v: Validator) -> Self {
        wire::Validator {
            address: v.address,
            power: v.power,
        }
    }
}

impl From<wire::ValidatorUpdate> for ValidatorUpdate {
    fn from(v: wire::ValidatorUpdate) -> Self {
        ValidatorUpdate {
            pub_key: v.pub_key.and_then(|k| k.sum).map(|sum| match sum {
                wire::public_key::Sum::Ed25519(key) => ValidatorKey::Ed25519(key),
                wire::public_key::Sum::Secp256k1(key) => ValidatorKey::Secp256k1(key),
            }),
            power: v.power,
        }
    }
}

impl From<ValidatorUpdate> for wire::ValidatorUpdate {
    fn from(v: ValidatorUpdate) -> Self {
        wire::ValidatorUpdate {
            pub_key: v.pub_key.map(|key| wire::PublicKey {
                sum: Some(match key {
                    ValidatorKey::Ed25519(bytes) => wire::public_key::Sum::Ed25519(bytes),
                    ValidatorKey::Secp256k1(bytes) => wire::public_key::Sum::Secp256k1(bytes),
                }),
            }),
            power: v.power,
        }
    }
}

impl From<wire::LastCommitInfo> for LastCommitInfo {
    fn from(info: wire::LastCommitInfo) -> Self {
        LastCommitInfo {
            round: info.round,
            votes: info
                .votes
                .into_iter()
                .map(|vote| VoteInfo {
                    validator: vote.validator.map(Into::into),
                    signed_last_block: vote.signed_last_block,
                })
                .collect(),
        }
    }
}

impl From<LastCommitInfo> for wire::LastCommitInfo {
    fn from(info: LastCommitInfo) -> Self {
        wire::LastCommitInfo {
            round: info.round,
            votes: info
                .votes
                .into_iter()
                .map(|vote| wire::VoteInfo {
                    validator: vote.validator.map(Into::into),
                    signed_last_block: vote.signed_last_block,
                })
                .collect(),
        }
    }
}

impl From<wire::Evidence> for Evidence {
    fn from(e: wire::Evidence) -> Self {
        Evidence {
            kind: match wire::EvidenceType::try_from(e.r#type) {
                Ok(wire::EvidenceType::DuplicateVote) => EvidenceKind::DuplicateVote,
                Ok(wire::EvidenceType::LightClientAttack) => EvidenceKind::LightClientAttack,
                _ => EvidenceKind::Unknown,
            },
            validator: e.validator.map(Into::into),
            height: e.height,
            time: e.time.map(Into::into),
            total_voting_power: e.total_voting_power,
        }
    }
}

impl From<Evidence> for wire::Evidence {
    fn from(e: Evidence) -> Self {
        let kind = match e.kind {
            EvidenceKind::Unknown => wire::EvidenceType::Unknown,
            EvidenceKind::DuplicateVote => wire::EvidenceType::DuplicateVote,
            EvidenceKind::LightClientAttack => wire::EvidenceType::LightClientAttack,
        };
        wire::Evidence {
            r#type: kind as i32,
            validator: e.validator.map(Into::into),
            height: e.height,
            time: e.time.map(Into::into),
            total_voting_power: e.total_voting_power,
        }
    }
}

impl From<wire::Header> for Header {
    fn from(h: wire::Header) -> Self {
        Header {
            version: h.version.map(|v| ConsensusVersion {
                block: v.block,
                app: v.app,
            }),
            chain_id: h.chain_id,
            height: h.height,
            time: h.time.map(Into::into),
            last_block_id: h.last_block_id.map(|id| BlockId {
                hash: id.hash,
                part_set_header: id.part_set_header.map(|p| PartSetHeader {
                    total: p.total,
                    hash: p.hash,
                }),
            }),
            last_commit_hash: h.last_commit_hash,
            data_hash: h.data_hash,
            validators_hash: h.validators_hash,
            next_validators_hash: h.next_validators_hash,
            consensus_hash: h.consensus_hash,
            app_hash: h.app_hash,
            last_results_hash: h.last_results_hash,
            evidence_hash: h.evidence_hash,
            proposer_address: h.proposer_address,
        }
    }
}

impl From<Header> for wire::Header {
    fn from(h: Header) -> Self {
        wire::Header {
            version: h.version.map(|v| wire::Consensus {
                block: v.block,
                app: v.app,
            }),
            chain_id: h.chain_id,
            height: h.height,
            time: h.time.map(Into::into),
            last_block_id: h.last_block_id.map(|id| wire::BlockId {
                hash: id.hash,
                part_set_header: id.part_set_header.map(|p| wire::PartSetHeader {
                    total: p.total,
                    hash: p.hash,
                }),
            }),
            last_commit_hash: h.last_commit_hash,
            data_hash: h.data_hash,
            validators_hash: h.validators_hash,
            next_validators_hash: h.next_validators_hash,
            consensus_hash: h.consensus_hash,
            app_hash: h.app_hash,
            last_results_hash: h.last_results_hash,
            evidence_hash: h.evidence_hash,
            proposer_address: h.proposer_address,
        }
    }
}

impl From<wire::Event> for Event {
    fn from(e: wire::Event) -> Self {
        Event {
            kind: e.r#type,
            attributes: e
                .attributes
                .into_iter()
                .map(|a| EventAttribute {
                    key: a.key,
                    value: a.value,
                    index: a.index,
                })
                .collect(),
        }
    }
}

impl From<Event> for wire::Event {
    fn from(e: Event) -> Self {
        wire::Event {
            r#type: e.kind,
            attributes: e
                .attributes
                .into_iter()
                .map(|a| wire::EventAttribute {
                    key: a.key,
                    value: a.value,
                    index: a.index,
                })
                .collect(),
        }
    }
}

impl From<wire::Snapshot> for Snapshot {
    fn from(s: wire::Snapshot) -> Self {
        Snapshot {
            height: s.height,
            format: s.format,
            chunks: s.chunks,
            hash: s.hash,
            metadata: s.metadata,
        }
    }
}

impl From<Snapshot> for wire::Snapshot {
    fn from(s: Snapshot) -> Self {
        wire::Snapshot {
            height: s.height,
            format: s.format,
            chunks: s.chunks,
            hash: s.hash,
            metadata: s.metadata,
        }
    }
}

impl From<wire::ProofOps> for ProofOps {
    fn from(p: wire::ProofOps) -> Self {
        ProofOps {
            ops: p
                .ops
                .into_iter()
                .map(|op| ProofOp {
                    kind: op.r#type,
                    key: op.key,
                    data: op.data,
                })
                .collect(),
        }
    }
}

impl From<ProofOps> for wire::ProofOps {
    fn from(p: ProofOps) -> Self {
        wire::ProofOps {
            ops: p
                .ops
                .into_iter()
                .map(|op| wire::ProofOp {
                    r#type: op.kind,
                    key: op.key,
                    data: op.data,
                })
                .collect(),
        }
    }
}
