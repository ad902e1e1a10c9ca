//! Slashing background app.
//!
//! `SlashingCheckRound` listens for slashing transactions next to the main
//! app. Once enough agents agree on one, the main table is suspended and
//! `StatusResetRound` collects the post-slash operator status; its end
//! event hands control back to the interrupted round.

use std::time::Duration;

use serde_json::Value;
use tessera_core::Payload;
use tracing::info;

use crate::abci_app::TransitionTable;
use crate::background::BackgroundApp;
use crate::error::RoundError;
use crate::offence::OffenceTracker;
use crate::registry::RoundRegistry;
use crate::round::{CollectionRound, CollectionRule, Event, Round, RoundId, RoundOutcome, RoundSpec};
use crate::synchronized::{keys, SynchronizedData};

pub const SLASHING_CHECK_ROUND: RoundId = RoundId("slashing_check_round");
pub const STATUS_RESET_ROUND: RoundId = RoundId("status_reset_round");

pub const SLASHING_PAYLOAD: &str = "slashing";
pub const STATUS_RESET_PAYLOAD: &str = "status_reset";

pub const SLASH_START: Event = Event("slash_start");
pub const SLASH_END: Event = Event("slash_end");
pub const NO_MAJORITY: Event = Event("no_majority");
pub const NONE: Event = Event("none");
pub const ROUND_TIMEOUT: Event = Event("round_timeout");

pub const ROUND_TIMEOUT_SECS: u64 = 30;

/// Agrees on the hash of a slashing transaction.
///
/// Payload round counts are not checked: the round runs across the main
/// app's rounds.
pub struct SlashingCheckRound {
    inner: CollectionRound,
}

impl SlashingCheckRound {
    pub fn new() -> Self {
        SlashingCheckRound {
            inner: CollectionRound::new(
                RoundSpec::new(
                    SLASHING_CHECK_ROUND,
                    SLASHING_PAYLOAD,
                    CollectionRule::SameUntilThreshold {
                        done: SLASH_START,
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

impl Default for SlashingCheckRound {
    fn default() -> Self {
        Self::new()
    }
}

impl Round for SlashingCheckRound {
    fn id(&self) -> RoundId {
        SLASHING_CHECK_ROUND
    }

    fn payload_kind(&self) -> Option<&'static str> {
        Some(SLASHING_PAYLOAD)
    }

    fn check_payload(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), RoundError> {
        self.inner.check_payload(data, payload)
    }

    fn process_payload(&mut self, data: &SynchronizedData, payload: Payload) -> Result<(), RoundError> {
        self.inner.process_payload(data, payload)
    }

    fn end_block(&mut self, data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        match self.inner.end_block(data)? {
            Some((next, SLASH_START)) => {
                let next = next.update([
                    (keys::SLASHING_IN_FLIGHT, Value::Bool(true)),
                    (keys::SLASHING_MAJORITY_REACHED, Value::Bool(true)),
                ]);
                Ok(Some((next, SLASH_START)))
            }
            other => Ok(other),
        }
    }
}

/// Agrees on the operator status after a slash and clears the offence
/// records of the slashed agents.
///
/// The payload body is an object with `operators_mapping` and
/// `slash_timestamps` (agent address to slash time).
pub struct StatusResetRound {
    inner: CollectionRound,
}

impl StatusResetRound {
    pub fn new() -> Self {
        StatusResetRound {
            inner: CollectionRound::new(
                RoundSpec::new(
                    STATUS_RESET_ROUND,
                    STATUS_RESET_PAYLOAD,
                    CollectionRule::SameUntilThreshold {
                        done: SLASH_END,
                        no_majority: NO_MAJORITY,
                        none: NONE,
                    },
                )
                .selection_fields(&[keys::OPERATORS_MAPPING, keys::SLASH_TIMESTAMPS]),
            ),
        }
    }
}

impl Default for StatusResetRound {
    fn default() -> Self {
        Self::new()
    }
}

impl Round for StatusResetRound {
    fn id(&self) -> RoundId {
        STATUS_RESET_ROUND
    }

    fn payload_kind(&self) -> Option<&'static str> {
        Some(STATUS_RESET_PAYLOAD)
    }

    fn check_payload(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), RoundError> {
        self.inner.check_payload(data, payload)
    }

    fn process_payload(&mut self, data: &SynchronizedData, payload: Payload) -> Result<(), RoundError> {
        self.inner.process_payload(data, payload)
    }

    fn end_block(&mut self, data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        let Some((next, event)) = self.inner.end_block(data)? else {
            return Ok(None);
        };
        if event != SLASH_END {
            return Ok(Some((next, event)));
        }

        let mut next = next.update([
            (keys::SLASHING_IN_FLIGHT, Value::Bool(false)),
            (keys::SLASHING_MAJORITY_REACHED, Value::Bool(false)),
        ]);
        let mut tracker = OffenceTracker::from_json(next.db().slashing_config())?;
        if let Some(Value::Object(slashed)) = next.get(keys::SLASH_TIMESTAMPS) {
            for agent in slashed.keys() {
                tracker.reset(agent);
            }
            info!(agents = slashed.len(), "offence status reset after slash");
        }
        next.db_mut().set_slashing_config(tracker.to_json()?);
        Ok(Some((next, SLASH_END)))
    }
}

pub fn register(registry: &mut RoundRegistry) -> Result<(), RoundError> {
    registry.register(
        SLASHING_CHECK_ROUND,
        std::sync::Arc::new(|| Box::new(SlashingCheckRound::new()) as Box<dyn Round>),
    )?;
    registry.register(
        STATUS_RESET_ROUND,
        std::sync::Arc::new(|| Box::new(StatusResetRound::new()) as Box<dyn Round>),
    )
}

pub fn app() -> BackgroundApp {
    let mut table = TransitionTable::new();
    table
        .entry(SLASHING_CHECK_ROUND)
        .or_default()
        .insert(SLASH_START, STATUS_RESET_ROUND);
    let reset = table.entry(STATUS_RESET_ROUND).or_default();
    for event in [SLASH_END, NO_MAJORITY, NONE, ROUND_TIMEOUT] {
        reset.insert(event, STATUS_RESET_ROUND);
    }

    BackgroundApp::new(SLASHING_CHECK_ROUND, table)
        .start_event(SLASH_START)
        .end_event(SLASH_END)
        .timeout(ROUND_TIMEOUT, Duration::from_secs(ROUND_TIMEOUT_SECS))
}

/// Body of a status reset payload
pub fn status_reset_body(operators_mapping: Value, slash_timestamps: Value) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(keys::OPERATORS_MAPPING.to_string(), operators_mapping);
    body.insert(keys::SLASH_TIMESTAMPS.to_string(), slash_timestamps);
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offence::NUMBER_OF_ROUNDS_TRACKED;
    use serde_json::json;
    use tessera_state::{AppDb, PeriodData};

    fn data() -> SynchronizedData {
        let setup: PeriodData = [(keys::PARTICIPANTS, json!(["a", "b", "c"]))]
            .into_iter()
            .map(|(key, value)| (key.to_string(), vec![value]))
            .collect();
        let mut db = AppDb::new(setup, Vec::<String>::new());
        db.set_round_count(3);
        SynchronizedData::new(db)
    }

    #[test]
    fn test_slashing_check_sets_flags() {
        let data = data();
        let mut round = SlashingCheckRound::new();
        for sender in ["a", "b", "c"] {
            round
                .process_payload(&data, Payload::new(sender, SLASHING_PAYLOAD, json!("0xdead")))
                .unwrap();
        }
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, SLASH_START);
        assert_eq!(next.get(keys::SLASHING_IN_FLIGHT), Some(json!(true)));
        assert_eq!(next.get(keys::SLASHING_MAJORITY_REACHED), Some(json!(true)));
        assert_eq!(next.get(keys::MOST_VOTED_TX_HASH), Some(json!("0xdead")));
    }

    #[test]
    fn test_status_reset_clears_offences() {
        let mut data = data();
        let mut tracker = OffenceTracker::new();
        for _ in 0..NUMBER_OF_ROUNDS_TRACKED {
            tracker.status_mut("a").blacklisted.add(true);
        }
        tracker.status_mut("b").num_double_signed = 1;
        data.db_mut().set_slashing_config(tracker.to_json().unwrap());

        let body = status_reset_body(json!({"a": "op1"}), json!({"a": 1700000000}));
        let mut round = StatusResetRound::new();
        for sender in ["a", "b", "c"] {
            let payload = Payload::new(sender, STATUS_RESET_PAYLOAD, body.clone()).with_round_count(3);
            round.process_payload(&data, payload).unwrap();
        }
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, SLASH_END);
        assert_eq!(next.get(keys::SLASHING_IN_FLIGHT), Some(json!(false)));
        assert_eq!(next.get(keys::OPERATORS_MAPPING), Some(json!({"a": "op1"})));

        let tracker = OffenceTracker::from_json(next.db().slashing_config()).unwrap();
        assert!(tracker.status("a").is_none());
        assert_eq!(tracker.status("b").unwrap().num_double_signed, 1);
    }

    #[test]
    fn test_app_shape() {
        let app = app();
        assert_eq!(app.round, SLASHING_CHECK_ROUND);
        assert_eq!(app.transition_table[&STATUS_RESET_ROUND].len(), 4);
        assert_eq!(
            app.event_to_timeout[&ROUND_TIMEOUT],
            Duration::from_secs(ROUND_TIMEOUT_SECS)
        );
        let mut registry = RoundRegistry::new();
        register(&mut registry).unwrap();
        assert!(registry.contains(STATUS_RESET_ROUND));
    }
}
