//! The service run by the node: agents register, agree on an estimate every
//! period, and reset. Slashing and termination run in the background.

use std::time::Duration;

use anyhow::Result;
use tessera_rounds::background::{slashing, termination};
use tessera_rounds::{
    AbciApp, AppDefinition, CollectionRule, Event, RoundId, RoundRegistry, RoundSpec,
    SynchronizedData, TransitionTable,
};
use tessera_state::AppDb;

use crate::config::NodeConfig;

pub const REGISTRATION_ROUND: RoundId = RoundId("registration_round");
pub const ESTIMATE_ROUND: RoundId = RoundId("estimate_round");
pub const RESET_ROUND: RoundId = RoundId("reset_and_pause_round");

pub const REGISTRATION_PAYLOAD: &str = "registration";
pub const ESTIMATE_PAYLOAD: &str = "estimate";
pub const RESET_PAYLOAD: &str = "reset";

pub const DONE: Event = Event("done");
pub const NO_MAJORITY: Event = Event("no_majority");
pub const NONE: Event = Event("none");
pub const ESTIMATE_TIMEOUT: Event = Event("estimate_timeout");
pub const RESET_TIMEOUT: Event = Event("reset_timeout");

pub mod keys {
    pub const REGISTRATIONS: &str = "participant_to_registration";
    pub const ESTIMATES: &str = "participant_to_estimate";
    pub const ESTIMATE: &str = "most_voted_estimate";
    pub const PERIOD_MARKER: &str = "period_marker";
}

fn same_until_threshold(id: RoundId, kind: &'static str) -> RoundSpec {
    RoundSpec::new(
        id,
        kind,
        CollectionRule::SameUntilThreshold {
            done: DONE,
            no_majority: NO_MAJORITY,
            none: NONE,
        },
    )
}

pub fn registry() -> Result<RoundRegistry> {
    let mut registry = RoundRegistry::new();
    registry.register_collection(
        RoundSpec::new(
            REGISTRATION_ROUND,
            REGISTRATION_PAYLOAD,
            CollectionRule::DifferentUntilAll { done: DONE },
        )
        .collection_key(keys::REGISTRATIONS)
        .skip_round_count_check(),
    )?;
    registry.register_collection(
        same_until_threshold(ESTIMATE_ROUND, ESTIMATE_PAYLOAD)
            .collection_key(keys::ESTIMATES)
            .selection_key(keys::ESTIMATE),
    )?;
    registry.register_collection(
        same_until_threshold(RESET_ROUND, RESET_PAYLOAD)
            .selection_key(keys::PERIOD_MARKER)
            .opens_period(),
    )?;
    slashing::register(&mut registry)?;
    termination::register(&mut registry)?;
    Ok(registry)
}

pub fn definition(round_timeout: Duration) -> AppDefinition {
    let mut table = TransitionTable::new();
    let mut edge = |from: RoundId, event: Event, to: RoundId| {
        table.entry(from).or_default().insert(event, to);
    };
    edge(REGISTRATION_ROUND, DONE, ESTIMATE_ROUND);
    edge(REGISTRATION_ROUND, NO_MAJORITY, REGISTRATION_ROUND);
    edge(ESTIMATE_ROUND, DONE, RESET_ROUND);
    edge(ESTIMATE_ROUND, NO_MAJORITY, RESET_ROUND);
    edge(ESTIMATE_ROUND, NONE, RESET_ROUND);
    edge(ESTIMATE_ROUND, ESTIMATE_TIMEOUT, RESET_ROUND);
    edge(RESET_ROUND, DONE, ESTIMATE_ROUND);
    edge(RESET_ROUND, NO_MAJORITY, REGISTRATION_ROUND);
    edge(RESET_ROUND, NONE, REGISTRATION_ROUND);
    edge(RESET_ROUND, RESET_TIMEOUT, REGISTRATION_ROUND);

    AppDefinition::new(REGISTRATION_ROUND, table)
        .timeout(ESTIMATE_TIMEOUT, round_timeout)
        .timeout(RESET_TIMEOUT, round_timeout)
        .cross_period_key(keys::REGISTRATIONS)
        .background(slashing::app())
        .background(termination::app())
}

/// Build the application from configuration
pub fn build(config: &NodeConfig) -> Result<AbciApp> {
    let db = AppDb::new(config.setup_data(), Vec::<String>::new());
    let app = AbciApp::new(
        definition(Duration::from_secs(config.round_timeout_secs)),
        registry()?,
        SynchronizedData::new(db),
    )?;
    Ok(app)
}
