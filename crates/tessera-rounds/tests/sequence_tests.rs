//! Round sequence integration tests

use std::time::Duration;

use serde_json::{json, Value};
use tessera_core::types::abci::{Header, RequestBeginBlock};
use tessera_core::{KeyPair, Payload, Timestamp, Transaction};
use tessera_rounds::background::termination;
use tessera_rounds::synchronized::keys;
use tessera_rounds::{
    AbciApp, AppDefinition, CollectionRule, Event, RoundError, RoundId, RoundRegistry,
    RoundSequence, RoundSpec, SequenceConfig, SynchronizedData, TransitionTable,
};
use tessera_state::{AppDb, MemoryStorage, PeriodData};

const A: RoundId = RoundId("round_a");
const B: RoundId = RoundId("round_b");
const C: RoundId = RoundId("round_c");

const EV_A: Event = Event("a");
const EV_B: Event = Event("b");
const EV_C: Event = Event("c");
const TIMEOUT: Event = Event("timeout");

const START: i64 = 1_700_000_000;

fn collect(id: RoundId, kind: &'static str, done: Event, no_majority: Event) -> RoundSpec {
    RoundSpec::new(
        id,
        kind,
        CollectionRule::SameUntilThreshold {
            done,
            no_majority,
            none: no_majority,
        },
    )
    .selection_key(kind)
}

fn table(edges: &[(RoundId, Event, RoundId)]) -> TransitionTable {
    let mut table = TransitionTable::new();
    for (from, event, to) in edges {
        table.entry(*from).or_default().insert(*event, *to);
    }
    table
}

fn setup_data(agents: &[KeyPair]) -> SynchronizedData {
    let addresses: Vec<String> = agents.iter().map(|a| a.address()).collect();
    let setup: PeriodData = [
        (keys::PARTICIPANTS, json!(addresses)),
        (keys::ALL_PARTICIPANTS, json!(addresses)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), vec![value]))
    .collect();
    SynchronizedData::new(AppDb::new(setup, Vec::<String>::new()))
}

/// `A -> {A, B, C}`, `B -> {B, timeout -> A}`, `C -> {C, timeout -> C}`
fn setup_sequence(with_termination: bool) -> (Vec<KeyPair>, RoundSequence<MemoryStorage>) {
    let agents: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();

    let mut registry = RoundRegistry::new();
    registry.register_collection(collect(A, "choice", EV_B, EV_C)).unwrap();
    registry.register_collection(collect(B, "b", EV_B, EV_B)).unwrap();
    registry.register_collection(collect(C, "c", EV_C, EV_C)).unwrap();

    let edges = table(&[
        (A, EV_A, A),
        (A, EV_B, B),
        (A, EV_C, C),
        (B, EV_B, B),
        (B, TIMEOUT, A),
        (C, EV_C, C),
        (C, TIMEOUT, C),
    ]);
    let mut definition = AppDefinition::new(A, edges).timeout(TIMEOUT, Duration::from_secs(10));
    if with_termination {
        termination::register(&mut registry).unwrap();
        definition = definition.background(termination::app());
    }

    let app = AbciApp::new(definition, registry, setup_data(&agents)).unwrap();
    let config = SequenceConfig {
        slashing_enabled: false,
        ..Default::default()
    };
    let mut sequence = RoundSequence::new(app, MemoryStorage::new(), config);
    sequence.setup().unwrap();
    (agents, sequence)
}

fn begin(height: i64, seconds: i64) -> RequestBeginBlock {
    RequestBeginBlock {
        header: Some(Header {
            height,
            time: Some(Timestamp::from_secs(START + seconds)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tx(agent: &KeyPair, kind: &str, round_count: i64, body: Value) -> Transaction {
    let payload = Payload::new(agent.address(), kind, body).with_round_count(round_count);
    Transaction::sign(payload, &agent.secret).unwrap()
}

/// Run one full block carrying `transactions`
fn run_block(
    sequence: &mut RoundSequence<MemoryStorage>,
    height: i64,
    seconds: i64,
    transactions: Vec<Transaction>,
) -> Vec<u8> {
    sequence.begin_block(&begin(height, seconds)).unwrap();
    for transaction in transactions {
        sequence.deliver_tx(transaction).unwrap();
    }
    sequence.end_block().unwrap();
    sequence.commit().unwrap()
}

#[test]
fn test_timeout_returns_to_initial_round() {
    let (agents, mut sequence) = setup_sequence(false);
    assert_eq!(sequence.current_round_id(), Some(A));

    let votes = agents[..3]
        .iter()
        .map(|agent| tx(agent, "choice", 0, json!("b")))
        .collect();
    run_block(&mut sequence, 1, 0, votes);
    assert_eq!(sequence.current_round_id(), Some(B));
    assert_eq!(sequence.latest_synchronized_data().get("choice"), Some(json!("b")));

    run_block(&mut sequence, 2, 9, Vec::new());
    assert_eq!(sequence.current_round_id(), Some(B));

    // the deadline passed before block 3: its begin_block fires the timeout
    sequence.begin_block(&begin(3, 11)).unwrap();
    assert_eq!(sequence.current_round_id(), Some(A));
    assert_eq!(sequence.last_round_id(), Some(B));
    sequence.end_block().unwrap();
    sequence.commit().unwrap();
    assert_eq!(sequence.height(), 3);
}

#[test]
fn test_timeout_self_loop() {
    let (agents, mut sequence) = setup_sequence(false);

    let split = agents
        .iter()
        .zip(["x", "x", "y", "y"])
        .map(|(agent, value)| tx(agent, "choice", 0, json!(value)))
        .collect();
    run_block(&mut sequence, 1, 0, split);
    assert_eq!(sequence.current_round_id(), Some(C));
    let round_count = sequence.latest_synchronized_data().round_count();

    sequence.begin_block(&begin(2, 30)).unwrap();
    assert_eq!(sequence.current_round_id(), Some(C));
    assert_eq!(
        sequence.latest_synchronized_data().round_count(),
        round_count + 1
    );
}

#[test]
fn test_stale_round_count_rejected() {
    let (agents, mut sequence) = setup_sequence(false);
    let votes = agents[..3]
        .iter()
        .map(|agent| tx(agent, "choice", 0, json!("b")))
        .collect();
    run_block(&mut sequence, 1, 0, votes);

    sequence.begin_block(&begin(2, 1)).unwrap();
    let late = tx(&agents[3], "choice", 0, json!("b"));
    assert!(matches!(
        sequence.deliver_tx(late),
        Err(RoundError::LateArrivingTransaction(_))
    ));
    let stale = tx(&agents[3], "b", 0, json!(1));
    assert!(matches!(
        sequence.deliver_tx(stale),
        Err(RoundError::TransactionNotValid(_))
    ));
    assert!(sequence.deliver_tx(tx(&agents[3], "b", 1, json!(1))).is_ok());
}

#[test]
fn test_termination_finishes_sequence() {
    let (agents, mut sequence) = setup_sequence(true);

    let votes = agents[..3]
        .iter()
        .map(|agent| tx(agent, termination::TERMINATION_PAYLOAD, 0, json!("0xfeed")))
        .collect();
    run_block(&mut sequence, 1, 0, votes);

    assert!(sequence.is_finished());
    assert_eq!(sequence.current_round_id(), Some(termination::TERMINATION_ROUND));
    assert_eq!(
        sequence
            .latest_synchronized_data()
            .get(keys::TERMINATION_MAJORITY_REACHED),
        Some(json!(true))
    );

    let err = sequence.begin_block(&begin(2, 1)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "internal error: round sequence is finished, cannot accept new blocks"
    );
    assert!(sequence
        .check_tx(&tx(&agents[0], "choice", 1, json!("b")))
        .is_err());
    assert!(sequence.status().is_finished);
}

#[test]
fn test_app_hash_changes_only_with_state() {
    let (agents, mut sequence) = setup_sequence(false);
    let first = run_block(&mut sequence, 1, 0, Vec::new());
    let second = run_block(&mut sequence, 2, 1, Vec::new());
    assert_eq!(first, second);

    let votes = agents[..3]
        .iter()
        .map(|agent| tx(agent, "choice", 0, json!("b")))
        .collect();
    let third = run_block(&mut sequence, 3, 2, votes);
    assert_ne!(second, third);
    assert_eq!(sequence.info().unwrap().last_block_app_hash, third);
}
