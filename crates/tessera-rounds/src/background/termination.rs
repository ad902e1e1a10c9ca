//! Termination background app: once enough agents sign off, the service
//! moves to a final round for good.

use std::sync::Arc;

use serde_json::Value;
use tessera_core::Payload;

use crate::abci_app::TransitionTable;
use crate::background::BackgroundApp;
use crate::error::RoundError;
use crate::registry::RoundRegistry;
use crate::round::{CollectionRound, CollectionRule, Event, Round, RoundId, RoundOutcome, RoundSpec};
use crate::synchronized::{keys, SynchronizedData};

pub const BACKGROUND_ROUND: RoundId = RoundId("background_round");
pub const TERMINATION_ROUND: RoundId = RoundId("termination_round");

pub const TERMINATION_PAYLOAD: &str = "termination";

pub const TERMINATE: Event = Event("terminate");
pub const NO_MAJORITY: Event = Event("no_majority");
pub const NONE: Event = Event("none");

/// Collects termination transactions alongside the main app
pub struct BackgroundRound {
    inner: CollectionRound,
}

impl BackgroundRound {
    pub fn new() -> Self {
        BackgroundRound {
            inner: CollectionRound::new(
                RoundSpec::new(
                    BACKGROUND_ROUND,
                    TERMINATION_PAYLOAD,
                    CollectionRule::SameUntilThreshold {
                        done: TERMINATE,
                        no_majority: NO_MAJORITY,
                        none: NONE,
                    },
                )
                .selection_key(keys::MOST_VOTED_TX_HASH)
                .skip_round_count_check(),
            ),
        }
    }
}

impl Default for BackgroundRound {
    fn default() -> Self {
        Self::new()
    }
}

impl Round for BackgroundRound {
    fn id(&self) -> RoundId {
        BACKGROUND_ROUND
    }

    fn payload_kind(&self) -> Option<&'static str> {
        Some(TERMINATION_PAYLOAD)
    }

    fn check_payload(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), RoundError> {
        self.inner.check_payload(data, payload)
    }

    fn process_payload(&mut self, data: &SynchronizedData, payload: Payload) -> Result<(), RoundError> {
        self.inner.process_payload(data, payload)
    }

    fn end_block(&mut self, data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        match self.inner.end_block(data)? {
            Some((next, TERMINATE)) => {
                let next = next.update([(keys::TERMINATION_MAJORITY_REACHED, Value::Bool(true))]);
                Ok(Some((next, TERMINATE)))
            }
            other => Ok(other),
        }
    }
}

/// Final round of a terminated service: takes no payloads, never ends
#[derive(Debug, Default)]
pub struct TerminationRound;

impl Round for TerminationRound {
    fn id(&self) -> RoundId {
        TERMINATION_ROUND
    }

    fn payload_kind(&self) -> Option<&'static str> {
        None
    }

    fn check_payload(&self, _data: &SynchronizedData, _payload: &Payload) -> Result<(), RoundError> {
        Ok(())
    }

    fn process_payload(&mut self, _data: &SynchronizedData, _payload: Payload) -> Result<(), RoundError> {
        Ok(())
    }

    fn end_block(&mut self, _data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        Ok(None)
    }
}

pub fn register(registry: &mut RoundRegistry) -> Result<(), RoundError> {
    registry.register(
        BACKGROUND_ROUND,
        Arc::new(|| Box::new(BackgroundRound::new()) as Box<dyn Round>),
    )?;
    registry.register(
        TERMINATION_ROUND,
        Arc::new(|| Box::new(TerminationRound) as Box<dyn Round>),
    )
}

pub fn app() -> BackgroundApp {
    let mut table = TransitionTable::new();
    table
        .entry(BACKGROUND_ROUND)
        .or_default()
        .insert(TERMINATE, TERMINATION_ROUND);
    table.entry(TERMINATION_ROUND).or_default();

    BackgroundApp::new(BACKGROUND_ROUND, table)
        .start_event(TERMINATE)
        .final_round(TERMINATION_ROUND)
}
