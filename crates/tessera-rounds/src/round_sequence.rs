//! Drives the application through the block lifecycle of the consensus
//! engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_core::types::abci::{
    Evidence, Header, LastCommitInfo, RequestBeginBlock, RequestInitChain, ResponseInfo,
    ResponseInitChain, ValidatorUpdate,
};
use tessera_core::{Timestamp, Transaction};
use tessera_state::{Checkpoint, CheckpointStore, Storage};
use tracing::{debug, error, info, warn};

use crate::abci_app::AbciApp;
use crate::blockchain::{BlockBuilder, Blockchain};
use crate::error::RoundError;
use crate::offence::OffenceTracker;
use crate::round::{RoundId, RoundOutcome};
use crate::synchronized::SynchronizedData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    WaitingForBeginBlock,
    WaitingForDeliverTx,
    WaitingForCommit,
}

impl fmt::Display for BlockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockPhase::WaitingForBeginBlock => "WAITING_FOR_BEGIN_BLOCK",
            BlockPhase::WaitingForDeliverTx => "WAITING_FOR_DELIVER_TX",
            BlockPhase::WaitingForCommit => "WAITING_FOR_COMMIT",
        };
        f.write_str(name)
    }
}

/// Round sequence configuration
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Slash amount per bad availability window
    pub light_slash_unit_amount: u64,
    /// Slash amount per discrete consensus offence
    pub serious_slash_unit_amount: u64,
    /// Rounds and periods kept when a new period starts
    pub cleanup_history_depth: usize,
    /// Values kept per key in the current period, if set
    pub cleanup_history_depth_current: Option<usize>,
    pub slashing_enabled: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        SequenceConfig {
            light_slash_unit_amount: 5_000_000_000_000_000,
            serious_slash_unit_amount: 8_000_000_000_000_000,
            cleanup_history_depth: 1,
            cleanup_history_depth_current: None,
            slashing_enabled: true,
        }
    }
}

/// Snapshot of the sequence exposed to status readers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStatus {
    pub height: u64,
    pub round: Option<String>,
    pub period: u64,
    pub round_count: i64,
    pub last_transition_timestamp: Option<Timestamp>,
    pub is_finished: bool,
}

pub struct RoundSequence<S: Storage> {
    config: SequenceConfig,
    abci_app: AbciApp,
    blockchain: Blockchain,
    block_builder: BlockBuilder,
    phase: BlockPhase,
    store: CheckpointStore<S>,
    offences: OffenceTracker,
    slashing_enabled: bool,
    synced_slashing_config: String,
    pending_outcome: Option<RoundOutcome>,
    validators: Vec<ValidatorUpdate>,
    chain_id: String,
    tm_height: Option<i64>,
    last_round_transition_timestamp: Option<Timestamp>,
    last_round_transition_height: u64,
    last_round_transition_root_hash: Vec<u8>,
    last_round_transition_tm_height: Option<i64>,
}

impl<S: Storage> RoundSequence<S> {
    pub fn new(abci_app: AbciApp, storage: S, config: SequenceConfig) -> Self {
        RoundSequence {
            slashing_enabled: config.slashing_enabled,
            config,
            abci_app,
            blockchain: Blockchain::default(),
            block_builder: BlockBuilder::new(),
            phase: BlockPhase::WaitingForBeginBlock,
            store: CheckpointStore::new(storage),
            offences: OffenceTracker::new(),
            synced_slashing_config: String::new(),
            pending_outcome: None,
            validators: Vec::new(),
            chain_id: String::new(),
            tm_height: None,
            last_round_transition_timestamp: None,
            last_round_transition_height: 0,
            last_round_transition_root_hash: Vec::new(),
            last_round_transition_tm_height: None,
        }
    }

    /// Enter the initial round of the application
    pub fn setup(&mut self) -> Result<(), RoundError> {
        self.abci_app.setup()?;
        info!("round sequence set up");
        Ok(())
    }

    /// Restore the last checkpoint, if any. Returns whether state was
    /// restored; when it was not, the application still needs
    /// [`RoundSequence::setup`].
    pub fn recover(&mut self) -> Result<bool, RoundError> {
        let Some(checkpoint) = self
            .store
            .restore(self.abci_app.synchronized_data_mut().db_mut())?
        else {
            return Ok(false);
        };

        self.blockchain = Blockchain::new(checkpoint.block_height);
        self.offences = self.load_offences()?;
        self.abci_app.cleanup_timeouts();
        if let Some(timestamp) = checkpoint.last_transition_timestamp {
            self.abci_app.update_time(timestamp)?;
        }
        if let Some(name) = &checkpoint.current_round_id {
            let round = self.abci_app.registry().lookup(name).ok_or_else(|| {
                RoundError::internal(format!("checkpoint names unknown round '{}'", name))
            })?;
            self.abci_app.schedule_round(round)?;
            self.abci_app
                .synchronized_data_mut()
                .db_mut()
                .set_round_count(checkpoint.round_count);
        }

        self.last_round_transition_timestamp = checkpoint.last_transition_timestamp;
        self.last_round_transition_height = checkpoint.last_transition_height;
        self.last_round_transition_root_hash = checkpoint.last_transition_root_hash;
        self.last_round_transition_tm_height = checkpoint.last_transition_tm_height;
        self.tm_height = checkpoint.last_transition_tm_height;
        info!(
            height = checkpoint.block_height,
            round = ?checkpoint.current_round_id,
            "recovered round sequence"
        );
        Ok(true)
    }

    fn load_offences(&mut self) -> Result<OffenceTracker, RoundError> {
        let config = self.abci_app.synchronized_data().db().slashing_config().to_string();
        let tracker = OffenceTracker::from_json(&config)?;
        self.synced_slashing_config = config;
        Ok(tracker)
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub fn abci_app(&self) -> &AbciApp {
        &self.abci_app
    }

    pub fn abci_app_mut(&mut self) -> &mut AbciApp {
        &mut self.abci_app
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn storage(&self) -> &S {
        self.store.storage()
    }

    pub fn height(&self) -> u64 {
        self.blockchain.height()
    }

    pub fn phase(&self) -> BlockPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.abci_app.is_finished()
    }

    pub fn current_round_id(&self) -> Option<RoundId> {
        self.abci_app.current_round_id()
    }

    pub fn last_round_id(&self) -> Option<RoundId> {
        self.abci_app.last_round_id()
    }

    pub fn latest_synchronized_data(&self) -> &SynchronizedData {
        self.abci_app.synchronized_data()
    }

    pub fn offences(&self) -> &OffenceTracker {
        &self.offences
    }

    pub fn slashing_enabled(&self) -> bool {
        self.slashing_enabled
    }

    pub fn validators(&self) -> &[ValidatorUpdate] {
        &self.validators
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn tm_height(&self) -> Option<i64> {
        self.tm_height
    }

    /// Slash amount owed by every tracked agent
    pub fn slash_amounts(&self) -> std::collections::BTreeMap<String, u64> {
        self.offences.slash_amounts(
            self.config.light_slash_unit_amount,
            self.config.serious_slash_unit_amount,
        )
    }

    /// Hash of the serialized database
    pub fn root_hash(&self) -> Result<Vec<u8>, RoundError> {
        Ok(self.latest_synchronized_data().db().hash()?.to_vec())
    }

    pub fn last_round_transition_timestamp(&self) -> Result<Timestamp, RoundError> {
        self.last_round_transition_timestamp.ok_or_else(|| {
            RoundError::internal(
                "Trying to access `last_round_transition_timestamp` while no transition has been completed yet.",
            )
        })
    }

    pub fn last_round_transition_height(&self) -> Result<u64, RoundError> {
        if self.last_round_transition_height == 0 {
            return Err(RoundError::internal(
                "Trying to access `last_round_transition_height` while no transition has been completed yet.",
            ));
        }
        Ok(self.last_round_transition_height)
    }

    /// Root hash at the last transition, or a placeholder naming the round
    /// count and period when none happened yet
    pub fn last_round_transition_root_hash(&self) -> Vec<u8> {
        if self.last_round_transition_root_hash.is_empty() {
            let data = self.latest_synchronized_data();
            return format!("root:{}reset:{}", data.round_count(), data.period_count()).into_bytes();
        }
        self.last_round_transition_root_hash.clone()
    }

    pub fn last_round_transition_tm_height(&self) -> Result<i64, RoundError> {
        self.last_round_transition_tm_height.ok_or_else(|| {
            RoundError::internal(
                "Trying to access Tendermint's last round transition height before any `end_block` calls.",
            )
        })
    }

    pub fn status(&self) -> SequenceStatus {
        let data = self.latest_synchronized_data();
        SequenceStatus {
            height: self.blockchain.height(),
            round: self.current_round_id().map(|id| id.name().to_string()),
            period: data.period_count(),
            round_count: data.round_count(),
            last_transition_timestamp: self.last_round_transition_timestamp,
            is_finished: self.is_finished(),
        }
    }

    fn expect_phase(&self, phase: BlockPhase, request: &str) -> Result<(), RoundError> {
        if self.phase != phase {
            return Err(RoundError::internal(format!(
                "cannot accept a '{}' request. Current phase={}",
                request, self.phase
            )));
        }
        Ok(())
    }

    pub fn info(&self) -> Result<ResponseInfo, RoundError> {
        let height = self.blockchain.height();
        let last_block_app_hash = if height == 0 {
            Vec::new()
        } else {
            self.root_hash()?
        };
        Ok(ResponseInfo {
            last_block_height: height as i64,
            last_block_app_hash,
            ..Default::default()
        })
    }

    /// Start a chain whose first block has `initial_height`
    pub fn init_chain(&mut self, request: &RequestInitChain) -> Result<ResponseInitChain, RoundError> {
        let offset = u64::try_from(request.initial_height.max(1) - 1).unwrap_or(0);
        self.blockchain = Blockchain::new(offset);
        self.validators = request.validators.clone();
        self.chain_id = request.chain_id.clone();
        info!(
            chain_id = %self.chain_id,
            initial_height = request.initial_height,
            validators = self.validators.len(),
            "chain initialized"
        );
        Ok(ResponseInitChain {
            consensus_params: None,
            validators: Vec::new(),
            app_hash: Vec::new(),
        })
    }

    pub fn begin_block(&mut self, request: &RequestBeginBlock) -> Result<(), RoundError> {
        if self.is_finished() {
            return Err(RoundError::internal(
                "round sequence is finished, cannot accept new blocks",
            ));
        }
        self.expect_phase(BlockPhase::WaitingForBeginBlock, "begin_block")?;
        let header = request
            .header
            .clone()
            .ok_or_else(|| RoundError::internal("begin_block request has no header"))?;
        let timestamp = header
            .time
            .ok_or_else(|| RoundError::internal("block header has no timestamp"))?;

        self.phase = BlockPhase::WaitingForDeliverTx;
        self.block_builder.reset();
        self.block_builder.set_header(header)?;
        self.abci_app.update_time(timestamp)?;
        if self.slashing_enabled {
            self.track_tm_offences(request.last_commit_info.as_ref(), &request.byzantine_validators);
        }
        debug!(
            height = self.block_builder.header()?.height,
            round = ?self.current_round_id(),
            "block started"
        );
        Ok(())
    }

    /// Record consensus offences; slashing is switched off for this run when
    /// the validator mapping is missing or incomplete. Nothing is recorded
    /// for the block unless every vote and evidence maps to an agent.
    fn track_tm_offences(&mut self, last_commit: Option<&LastCommitInfo>, evidence: &[Evidence]) {
        let mut staged = self.offences.clone();
        let result = self
            .latest_synchronized_data()
            .validator_to_agent()
            .and_then(|mapping| {
                if let Some(info) = last_commit {
                    staged.track_votes(&info.votes, &mapping)?;
                }
                staged.track_evidence(evidence, &mapping)
            });
        match result {
            Ok(()) => self.offences = staged,
            Err(e) => {
                error!("{}. Disabling slashing for this run.", e);
                self.slashing_enabled = false;
            }
        }
    }

    /// Validate a transaction without applying it
    pub fn check_tx(&self, transaction: &Transaction) -> Result<(), RoundError> {
        if self.is_finished() {
            return Err(RoundError::internal(
                "round sequence is finished, cannot accept new transactions",
            ));
        }
        transaction
            .verify()
            .map_err(|e| RoundError::SignatureNotValid(e.to_string()))?;
        self.abci_app.check_payload(&transaction.payload)
    }

    pub fn deliver_tx(&mut self, transaction: Transaction) -> Result<(), RoundError> {
        self.expect_phase(BlockPhase::WaitingForDeliverTx, "deliver_tx")?;
        if self.is_finished() {
            return Err(RoundError::internal(
                "round sequence is finished, cannot accept new transactions",
            ));
        }
        transaction
            .verify()
            .map_err(|e| RoundError::SignatureNotValid(e.to_string()))?;
        self.abci_app.check_payload(&transaction.payload)?;
        self.abci_app.process_payload(transaction.payload.clone())?;
        self.block_builder.add_transaction(transaction);
        Ok(())
    }

    pub fn end_block(&mut self) -> Result<(), RoundError> {
        self.expect_phase(BlockPhase::WaitingForDeliverTx, "end_block")?;
        self.phase = BlockPhase::WaitingForCommit;
        self.tm_height = Some(self.block_builder.header()?.height);
        self.pending_outcome = self.abci_app.end_block()?;
        Ok(())
    }

    /// Seal the block, apply the round result gathered at `end_block` and
    /// persist. Returns the new app hash.
    pub fn commit(&mut self) -> Result<Vec<u8>, RoundError> {
        self.expect_phase(BlockPhase::WaitingForCommit, "commit")?;
        let block = self.block_builder.get_block()?;
        self.blockchain.add_block(block).map_err(|e| {
            RoundError::AddBlock(format!(
                "inconsistent state when adding block: {}",
                e
            ))
        })?;
        self.update_round()?;
        self.block_builder.reset();
        self.phase = BlockPhase::WaitingForBeginBlock;
        self.persist()?;
        self.root_hash()
    }

    fn update_round(&mut self) -> Result<(), RoundError> {
        let Some((data, event)) = self.pending_outcome.take() else {
            return Ok(());
        };
        let period_before = self.latest_synchronized_data().period_count();
        self.abci_app.process_event(event, Some(data))?;

        if self.latest_synchronized_data().db().slashing_config() != self.synced_slashing_config {
            self.offences = self.load_offences()?;
        }
        if self.slashing_enabled {
            match self.latest_synchronized_data().participants() {
                Ok(participants) => {
                    let offences = self.latest_synchronized_data().app_offences();
                    self.offences.track_app_offences(&participants, &offences);
                }
                Err(e) => warn!("cannot track application offences: {}", e),
            }
        }
        let config = self.offences.to_json()?;
        self.abci_app
            .synchronized_data_mut()
            .db_mut()
            .set_slashing_config(config.clone());
        self.synced_slashing_config = config;

        if self.latest_synchronized_data().period_count() != period_before {
            self.abci_app.cleanup(
                self.config.cleanup_history_depth,
                self.config.cleanup_history_depth_current,
            );
        }

        self.last_round_transition_timestamp = self
            .blockchain
            .last_block()
            .and_then(|block| block.timestamp());
        self.last_round_transition_height = self.blockchain.height();
        self.last_round_transition_root_hash = self.root_hash()?;
        self.last_round_transition_tm_height = self.tm_height;
        info!(
            height = self.last_round_transition_height,
            round = ?self.current_round_id(),
            "round transition completed"
        );
        Ok(())
    }

    fn persist(&mut self) -> Result<(), RoundError> {
        let checkpoint = Checkpoint {
            last_transition_timestamp: self.last_round_transition_timestamp,
            last_transition_height: self.last_round_transition_height,
            last_transition_root_hash: self.last_round_transition_root_hash.clone(),
            last_transition_tm_height: self.last_round_transition_tm_height,
            block_height: self.blockchain.height(),
            round_count: self.latest_synchronized_data().round_count(),
            current_round_id: self.current_round_id().map(|id| id.name().to_string()),
        };
        self.store
            .save(self.abci_app.synchronized_data().db(), &checkpoint)?;
        Ok(())
    }

    /// Drop the ledger, e.g. before the engine replays blocks
    pub fn reset_blockchain(&mut self, is_replay: bool) {
        self.blockchain = Blockchain::new(0);
        if is_replay {
            self.block_builder.reset();
            self.phase = BlockPhase::WaitingForBeginBlock;
        }
    }

    /// Restart the application from `restart_from_round`, optionally with a
    /// database snapshot. The restarted round runs with `round_count`.
    pub fn reset_state(
        &mut self,
        restart_from_round: &str,
        round_count: i64,
        serialized_db_state: Option<&str>,
    ) -> Result<(), RoundError> {
        let Some(round) = self
            .abci_app
            .definition()
            .rounds()
            .into_iter()
            .find(|id| id.name() == restart_from_round)
        else {
            let ids: Vec<&str> = self
                .abci_app
                .definition()
                .rounds()
                .into_iter()
                .map(|id| id.name())
                .collect();
            return Err(RoundError::internal(format!(
                "Cannot reset state. The Tendermint recovery parameters are incorrect. Did you update the `restart_from_round` with an incorrect round id? Found {}, but the app's transition function has the following round ids: {:?}.",
                restart_from_round, ids
            )));
        };

        if let Some(serialized) = serialized_db_state {
            self.abci_app
                .synchronized_data_mut()
                .db_mut()
                .sync(serialized)?;
            self.offences = self.load_offences()?;
        }
        self.reset_to_default_params();
        self.abci_app
            .synchronized_data_mut()
            .db_mut()
            .set_round_count(round_count - 1);
        self.abci_app.cleanup_timeouts();
        self.abci_app.schedule_round(round)?;
        info!(round = %round, round_count, "state reset");
        Ok(())
    }

    fn reset_to_default_params(&mut self) {
        self.last_round_transition_timestamp = None;
        self.last_round_transition_height = 0;
        self.last_round_transition_root_hash = Vec::new();
        self.last_round_transition_tm_height = None;
        self.tm_height = None;
        self.pending_outcome = None;
    }

    /// Header of the block in progress
    pub fn current_header(&self) -> Result<&Header, RoundError> {
        self.block_builder.header()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abci_app::{AppDefinition, TransitionTable};
    use crate::registry::RoundRegistry;
    use crate::round::{CollectionRule, Event, RoundSpec};
    use crate::synchronized::keys;
    use serde_json::{json, Value};
    use tessera_core::types::abci::{EvidenceKind, Validator, VoteInfo};
    use tessera_core::{KeyPair, Payload};
    use tessera_state::{AppDb, MemoryStorage, PeriodData};

    const COLLECT: RoundId = RoundId("collect");
    const DONE: Event = Event("done");

    struct Fixture {
        agents: Vec<KeyPair>,
        sequence: RoundSequence<MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let agents: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let addresses: Vec<String> = agents.iter().map(|a| a.address()).collect();
        let setup: PeriodData = [
            (keys::PARTICIPANTS, json!(addresses)),
            (keys::ALL_PARTICIPANTS, json!(addresses)),
            (keys::CONSENSUS_THRESHOLD, Value::Null),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), vec![value]))
        .collect();

        let mut registry = RoundRegistry::new();
        registry
            .register_collection(
                RoundSpec::new(
                    COLLECT,
                    "estimate",
                    CollectionRule::SameUntilThreshold {
                        done: DONE,
                        no_majority: Event("no_majority"),
                        none: Event("none"),
                    },
                )
                .selection_key("estimate"),
            )
            .unwrap();
        let mut table = TransitionTable::new();
        table.entry(COLLECT).or_default().insert(DONE, COLLECT);
        table
            .entry(COLLECT)
            .or_default()
            .insert(Event("no_majority"), COLLECT);

        let app = AbciApp::new(
            AppDefinition::new(COLLECT, table),
            registry,
            SynchronizedData::new(AppDb::new(setup, Vec::<String>::new())),
        )
        .unwrap();
        let config = SequenceConfig {
            slashing_enabled: false,
            ..Default::default()
        };
        let mut sequence = RoundSequence::new(app, MemoryStorage::new(), config);
        sequence.setup().unwrap();
        Fixture { agents, sequence }
    }

    fn begin(height: i64) -> RequestBeginBlock {
        RequestBeginBlock {
            header: Some(Header {
                height,
                time: Some(Timestamp::from_secs(1_700_000_000 + height)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn signed(agent: &KeyPair, round_count: i64, body: Value) -> Transaction {
        let payload = Payload::new(agent.address(), "estimate", body).with_round_count(round_count);
        Transaction::sign(payload, &agent.secret).unwrap()
    }

    #[test]
    fn test_phase_errors() {
        let Fixture { agents, mut sequence } = fixture();
        let err = sequence.deliver_tx(signed(&agents[0], 0, json!(1))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "internal error: cannot accept a 'deliver_tx' request. Current phase=WAITING_FOR_BEGIN_BLOCK"
        );
        assert!(sequence.commit().is_err());

        sequence.begin_block(&begin(1)).unwrap();
        assert!(sequence.begin_block(&begin(1)).is_err());
        assert!(sequence.commit().is_err());
        sequence.end_block().unwrap();
        assert!(sequence.end_block().is_err());
        sequence.commit().unwrap();
        assert_eq!(sequence.height(), 1);
        assert_eq!(sequence.phase(), BlockPhase::WaitingForBeginBlock);
    }

    #[test]
    fn test_round_concludes_at_commit() {
        let Fixture { agents, mut sequence } = fixture();
        sequence.begin_block(&begin(1)).unwrap();
        for agent in &agents[..3] {
            sequence.deliver_tx(signed(agent, 0, json!(7))).unwrap();
        }
        sequence.end_block().unwrap();
        assert_eq!(sequence.latest_synchronized_data().round_count(), 0);
        assert!(sequence.last_round_transition_timestamp().is_err());

        sequence.commit().unwrap();
        assert_eq!(sequence.latest_synchronized_data().get("estimate"), Some(json!(7)));
        assert_eq!(sequence.latest_synchronized_data().round_count(), 1);
        assert_eq!(
            sequence.last_round_transition_timestamp().unwrap(),
            Timestamp::from_secs(1_700_000_001)
        );
        assert_eq!(sequence.last_round_transition_height().unwrap(), 1);
        assert_eq!(sequence.last_round_transition_tm_height().unwrap(), 1);
        assert_eq!(sequence.blockchain().last_block().unwrap().transactions.len(), 3);
    }

    #[test]
    fn test_invalid_transactions_rejected() {
        let Fixture { agents, mut sequence } = fixture();
        sequence.begin_block(&begin(1)).unwrap();

        let mut forged = signed(&agents[0], 0, json!(1));
        forged.payload.body = json!(2);
        assert!(matches!(
            sequence.deliver_tx(forged),
            Err(RoundError::SignatureNotValid(_))
        ));

        let outsider = KeyPair::generate();
        assert!(matches!(
            sequence.deliver_tx(signed(&outsider, 0, json!(1))),
            Err(RoundError::TransactionNotValid(_))
        ));
        assert!(sequence.check_tx(&signed(&agents[1], 0, json!(1))).is_ok());
    }

    #[test]
    fn test_root_hash_placeholder_and_reset_state() {
        let Fixture { mut sequence, .. } = fixture();
        assert_eq!(sequence.last_round_transition_root_hash(), b"root:0reset:0".to_vec());

        let err = sequence.reset_state("unknown", 3, None).unwrap_err();
        assert!(err
            .to_string()
            .contains("Found unknown, but the app's transition function has the following round ids: [\"collect\"]"));

        sequence.reset_state("collect", 5, None).unwrap();
        assert_eq!(sequence.current_round_id(), Some(COLLECT));
        assert_eq!(sequence.latest_synchronized_data().round_count(), 5);
        assert!(sequence.last_round_transition_tm_height().is_err());
    }

    #[test]
    fn test_init_chain_and_replay_reset() {
        let Fixture { mut sequence, .. } = fixture();
        sequence
            .init_chain(&RequestInitChain {
                initial_height: 10,
                chain_id: "test".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sequence.height(), 9);
        assert!(sequence.begin_block(&begin(1)).is_ok());
        sequence.end_block().unwrap();
        assert!(matches!(sequence.commit(), Err(RoundError::AddBlock(_))));

        sequence.reset_blockchain(true);
        assert_eq!(sequence.phase(), BlockPhase::WaitingForBeginBlock);
        assert_eq!(sequence.height(), 0);
        assert_eq!(sequence.info().unwrap().last_block_height, 0);
    }

    #[test]
    fn test_missing_validator_mapping_disables_slashing() {
        let Fixture { mut sequence, .. } = fixture();
        sequence.slashing_enabled = true;
        let mut request = begin(1);
        request.last_commit_info = Some(LastCommitInfo {
            round: 0,
            votes: vec![Default::default()],
        });
        sequence.begin_block(&request).unwrap();
        assert!(!sequence.slashing_enabled());
    }

    #[test]
    fn test_unmapped_evidence_discards_block_votes() {
        let Fixture { mut sequence, .. } = fixture();
        sequence.slashing_enabled = true;
        sequence
            .abci_app_mut()
            .synchronized_data_mut()
            .db_mut()
            .update([(keys::VALIDATOR_TO_AGENT, json!({ "0a": "agent-0" }))]);

        let mut request = begin(1);
        request.last_commit_info = Some(LastCommitInfo {
            round: 0,
            votes: vec![VoteInfo {
                validator: Some(Validator {
                    address: vec![0x0a],
                    power: 10,
                }),
                signed_last_block: false,
            }],
        });
        request.byzantine_validators = vec![Evidence {
            kind: EvidenceKind::DuplicateVote,
            validator: Some(Validator {
                address: vec![0x0b],
                power: 10,
            }),
            ..Default::default()
        }];
        let before = sequence.offences().clone();
        sequence.begin_block(&request).unwrap();

        assert!(!sequence.slashing_enabled());
        assert_eq!(sequence.offences(), &before);
        assert!(sequence.offences().status("agent-0").is_none());
    }

    #[test]
    fn test_mapped_votes_are_recorded() {
        let Fixture { mut sequence, .. } = fixture();
        sequence.slashing_enabled = true;
        sequence
            .abci_app_mut()
            .synchronized_data_mut()
            .db_mut()
            .update([(keys::VALIDATOR_TO_AGENT, json!({ "0a": "agent-0" }))]);

        let mut request = begin(1);
        request.last_commit_info = Some(LastCommitInfo {
            round: 0,
            votes: vec![VoteInfo {
                validator: Some(Validator {
                    address: vec![0x0a],
                    power: 10,
                }),
                signed_last_block: false,
            }],
        });
        sequence.begin_block(&request).unwrap();

        assert!(sequence.slashing_enabled());
        assert!(sequence.offences().status("agent-0").is_some());
    }

    #[test]
    fn test_commit_persists_and_recovers() {
        let Fixture { agents, mut sequence } = fixture();
        sequence.begin_block(&begin(1)).unwrap();
        for agent in &agents[..3] {
            sequence.deliver_tx(signed(agent, 0, json!("x"))).unwrap();
        }
        sequence.end_block().unwrap();
        let app_hash = sequence.commit().unwrap();

        let storage = sequence.storage().clone();
        let Fixture {
            sequence: fresh, ..
        } = fixture();
        let mut restored = RoundSequence::new(
            fresh.abci_app,
            storage,
            SequenceConfig::default(),
        );
        assert!(restored.recover().unwrap());
        assert_eq!(restored.height(), 1);
        assert_eq!(restored.current_round_id(), Some(COLLECT));
        assert_eq!(restored.latest_synchronized_data().round_count(), 1);
        assert_eq!(restored.latest_synchronized_data().get("estimate"), Some(json!("x")));
        assert_eq!(restored.info().unwrap().last_block_app_hash, app_hash);
        assert_eq!(
            restored.last_round_transition_timestamp().unwrap(),
            Timestamp::from_secs(1_700_000_001)
        );
    }
}
