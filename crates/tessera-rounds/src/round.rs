//! Round abstraction and the stock round kinds.
//!
//! A round collects at most one payload per participant and, at the end of
//! every block, decides whether it has concluded. A concluded round yields
//! the next version of the synchronized data plus the event that selects
//! the next round in the transition table.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tessera_core::Payload;
use tracing::debug;

use crate::error::RoundError;
use crate::quorum::is_majority_possible;
use crate::synchronized::SynchronizedData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event(pub &'static str);

impl Event {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundId(pub &'static str);

impl RoundId {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Outcome of a concluded round
pub type RoundOutcome = (SynchronizedData, Event);

pub trait Round: Send {
    fn id(&self) -> RoundId;

    /// Payload kind accepted by the round, `None` when it takes no payloads
    fn payload_kind(&self) -> Option<&'static str>;

    fn check_payload(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), RoundError>;

    fn process_payload(&mut self, data: &SynchronizedData, payload: Payload)
        -> Result<(), RoundError>;

    /// Called once per block; `Some` concludes the round
    fn end_block(&mut self, data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError>;
}

/// Check that `payload` is the kind `round` expects.
///
/// A payload of the kind of the round that just ended, stamped with the
/// previous round count, is reported as late rather than unrecognized.
pub fn check_payload_kind(
    round: &dyn Round,
    previous_kind: Option<&str>,
    round_count: i64,
    payload: &Payload,
) -> Result<(), RoundError> {
    let Some(expected) = round.payload_kind() else {
        return Err(RoundError::TransactionTypeNotRecognized(
            "current round does not allow transactions".to_string(),
        ));
    };
    if payload.kind == expected {
        return Ok(());
    }
    if previous_kind == Some(payload.kind.as_str()) && payload.round_count == round_count - 1 {
        return Err(RoundError::LateArrivingTransaction(format!(
            "request '{}' is from previous round; skipping",
            payload.kind
        )));
    }
    Err(RoundError::TransactionTypeNotRecognized(format!(
        "request '{}' not recognized; only {} is supported",
        payload.kind, expected
    )))
}

/// Conclusion rule of a [`CollectionRound`], with the events it emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRule {
    /// Wait for `threshold` identical values
    SameUntilThreshold {
        done: Event,
        no_majority: Event,
        none: Event,
    },
    /// Wait for a distinct value from every participant
    DifferentUntilAll { done: Event },
    /// Wait for `threshold` values, then for `required_block_confirmations`
    /// more blocks
    DifferentUntilThreshold {
        done: Event,
        required_block_confirmations: u32,
    },
    /// Only the elected keeper may send, once
    OnlyKeeperSends { done: Event, fail: Event },
    /// Boolean (or null) votes
    Voting {
        done: Event,
        negative: Event,
        none: Event,
        no_majority: Event,
    },
}

/// Where the decided value is written when the round concludes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Nothing,
    /// The whole value under one key
    Key(&'static str),
    /// Each listed field of an object value under a key of the same name
    Fields(&'static [&'static str]),
}

/// Static description of a collection round
#[derive(Debug, Clone)]
pub struct RoundSpec {
    pub id: RoundId,
    pub payload_kind: &'static str,
    pub rule: CollectionRule,
    pub collection_key: Option<&'static str>,
    pub selection: Selection,
    pub check_round_count: bool,
    pub opens_period: bool,
}

impl RoundSpec {
    pub fn new(id: RoundId, payload_kind: &'static str, rule: CollectionRule) -> Self {
        RoundSpec {
            id,
            payload_kind,
            rule,
            collection_key: None,
            selection: Selection::Nothing,
            check_round_count: true,
            opens_period: false,
        }
    }

    pub fn collection_key(mut self, key: &'static str) -> Self {
        self.collection_key = Some(key);
        self
    }

    pub fn selection_key(mut self, key: &'static str) -> Self {
        self.selection = Selection::Key(key);
        self
    }

    pub fn selection_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.selection = Selection::Fields(fields);
        self
    }

    /// Accept payloads regardless of their round count stamp
    pub fn skip_round_count_check(mut self) -> Self {
        self.check_round_count = false;
        self
    }

    /// Write the outcome into a new database period
    pub fn opens_period(mut self) -> Self {
        self.opens_period = true;
        self
    }
}

/// Generic payload-collecting round driven by a [`CollectionRule`]
#[derive(Debug, Clone)]
pub struct CollectionRound {
    spec: RoundSpec,
    collection: BTreeMap<String, Payload>,
    block_confirmations: u32,
}

impl CollectionRound {
    pub fn new(spec: RoundSpec) -> Self {
        CollectionRound {
            spec,
            collection: BTreeMap::new(),
            block_confirmations: 0,
        }
    }

    pub fn spec(&self) -> &RoundSpec {
        &self.spec
    }

    /// Payloads received so far, by sender
    pub fn collection(&self) -> &BTreeMap<String, Payload> {
        &self.collection
    }

    pub fn block_confirmations(&self) -> u32 {
        self.block_confirmations
    }

    fn validate(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), String> {
        if self.spec.check_round_count && payload.round_count != data.round_count() {
            return Err(format!(
                "Expected round count {} and got {}.",
                data.round_count(),
                payload.round_count
            ));
        }

        if let CollectionRule::OnlyKeeperSends { .. } = self.spec.rule {
            let keeper = data.most_voted_keeper_address().map_err(|e| e.to_string())?;
            if payload.sender != keeper {
                return Err(format!("{} not elected as keeper.", payload.sender));
            }
            if !self.collection.is_empty() {
                return Err("keeper payload value already set.".to_string());
            }
            return Ok(());
        }

        let participants = data.participants().map_err(|e| e.to_string())?;
        if !participants.contains(&payload.sender) {
            let sorted: Vec<&String> = participants.iter().collect();
            return Err(format!(
                "{} not in list of participants: {:?}",
                payload.sender, sorted
            ));
        }
        if self.collection.contains_key(&payload.sender) {
            return Err(format!(
                "sender {} has already sent value for round: {}",
                payload.sender, self.spec.id
            ));
        }

        match self.spec.rule {
            CollectionRule::DifferentUntilAll { .. } => {
                if self.collection.values().any(|p| p.body == payload.body) {
                    return Err(format!(
                        "value '{}' was already collected in round {}",
                        payload.body, self.spec.id
                    ));
                }
            }
            CollectionRule::Voting { .. } => {
                if !matches!(payload.body, Value::Bool(_) | Value::Null) {
                    return Err(format!("vote must be a boolean or null, got {}", payload.body));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn votes(&self) -> BTreeMap<String, String> {
        self.collection
            .iter()
            .map(|(sender, payload)| (sender.clone(), payload.vote_key()))
            .collect()
    }

    /// Most voted value and its number of votes
    fn most_voted(&self) -> Option<(&Value, usize)> {
        let mut counts: BTreeMap<String, (&Value, usize)> = BTreeMap::new();
        for payload in self.collection.values() {
            counts
                .entry(payload.vote_key())
                .or_insert((&payload.body, 0))
                .1 += 1;
        }
        counts.into_values().max_by_key(|(_, count)| *count)
    }

    fn count_votes(&self, vote: &Value) -> usize {
        self.collection
            .values()
            .filter(|payload| &payload.body == vote)
            .count()
    }

    fn serialized_collection(&self) -> Result<Value, RoundError> {
        serde_json::to_value(&self.collection).map_err(|e| RoundError::internal(e.to_string()))
    }

    /// Next synchronized data holding the collection and the selected value
    fn conclude(
        &self,
        data: &SynchronizedData,
        selected: Option<Value>,
    ) -> Result<SynchronizedData, RoundError> {
        let mut entries: Vec<(String, Value)> = Vec::new();
        if let Some(key) = self.spec.collection_key {
            entries.push((key.to_string(), self.serialized_collection()?));
        }
        if let Some(value) = selected {
            match &self.spec.selection {
                Selection::Nothing => {}
                Selection::Key(key) => entries.push((key.to_string(), value)),
                Selection::Fields(fields) => {
                    for field in fields.iter() {
                        let field_value = value.get(*field).cloned().unwrap_or(Value::Null);
                        entries.push((field.to_string(), field_value));
                    }
                }
            }
        }

        if self.spec.opens_period {
            data.create(entries.into_iter().map(|(key, value)| (key, vec![value])))
        } else {
            Ok(data.update(entries))
        }
    }
}

impl Round for CollectionRound {
    fn id(&self) -> RoundId {
        self.spec.id
    }

    fn payload_kind(&self) -> Option<&'static str> {
        Some(self.spec.payload_kind)
    }

    fn check_payload(&self, data: &SynchronizedData, payload: &Payload) -> Result<(), RoundError> {
        self.validate(data, payload)
            .map_err(RoundError::TransactionNotValid)
    }

    fn process_payload(
        &mut self,
        data: &SynchronizedData,
        payload: Payload,
    ) -> Result<(), RoundError> {
        self.validate(data, &payload).map_err(RoundError::Internal)?;
        debug!(round = %self.spec.id, sender = %payload.sender, "payload collected");
        self.collection.insert(payload.sender.clone(), payload);
        Ok(())
    }

    fn end_block(&mut self, data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        match self.spec.rule.clone() {
            CollectionRule::SameUntilThreshold {
                done,
                no_majority,
                none,
            } => {
                let threshold = data.consensus_threshold()?;
                if let Some((value, count)) = self.most_voted() {
                    if count >= threshold {
                        if value.is_null() {
                            return Ok(Some((data.clone(), none)));
                        }
                        let value = value.clone();
                        return Ok(Some((self.conclude(data, Some(value))?, done)));
                    }
                }
                if !is_majority_possible(&self.votes(), data.nb_participants()?, threshold) {
                    return Ok(Some((data.clone(), no_majority)));
                }
                Ok(None)
            }
            CollectionRule::DifferentUntilAll { done } => {
                if self.collection.len() >= data.nb_participants()? {
                    return Ok(Some((self.conclude(data, None)?, done)));
                }
                Ok(None)
            }
            CollectionRule::DifferentUntilThreshold {
                done,
                required_block_confirmations,
            } => {
                if self.collection.len() < data.consensus_threshold()? {
                    return Ok(None);
                }
                self.block_confirmations += 1;
                if self.block_confirmations <= required_block_confirmations {
                    return Ok(None);
                }
                let selected = Value::from(
                    self.collection
                        .keys()
                        .map(|sender| Value::String(sender.clone()))
                        .collect::<Vec<_>>(),
                );
                Ok(Some((self.conclude(data, Some(selected))?, done)))
            }
            CollectionRule::OnlyKeeperSends { done, fail } => {
                let Some(payload) = self.collection.values().next() else {
                    return Ok(None);
                };
                if payload.body.is_null() {
                    return Ok(Some((data.clone(), fail)));
                }
                let value = payload.body.clone();
                Ok(Some((self.conclude(data, Some(value))?, done)))
            }
            CollectionRule::Voting {
                done,
                negative,
                none,
                no_majority,
            } => {
                let threshold = data.consensus_threshold()?;
                if self.count_votes(&Value::Bool(true)) >= threshold {
                    return Ok(Some((self.conclude(data, Some(Value::Bool(true)))?, done)));
                }
                if self.count_votes(&Value::Bool(false)) >= threshold {
                    return Ok(Some((data.clone(), negative)));
                }
                if self.count_votes(&Value::Null) >= threshold {
                    return Ok(Some((data.clone(), none)));
                }
                if !is_majority_possible(&self.votes(), data.nb_participants()?, threshold) {
                    return Ok(Some((data.clone(), no_majority)));
                }
                Ok(None)
            }
        }
    }
}

/// Placeholder for final rounds; it takes no payloads and never concludes
#[derive(Debug, Clone)]
pub struct DegenerateRound {
    id: RoundId,
}

impl DegenerateRound {
    pub fn new(id: RoundId) -> Self {
        DegenerateRound { id }
    }
}

const DEGENERATE: &str = "DegenerateRound should not be used in operation.";

impl Round for DegenerateRound {
    fn id(&self) -> RoundId {
        self.id
    }

    fn payload_kind(&self) -> Option<&'static str> {
        None
    }

    fn check_payload(&self, _data: &SynchronizedData, _payload: &Payload) -> Result<(), RoundError> {
        Err(RoundError::internal(DEGENERATE))
    }

    fn process_payload(
        &mut self,
        _data: &SynchronizedData,
        _payload: Payload,
    ) -> Result<(), RoundError> {
        Err(RoundError::internal(DEGENERATE))
    }

    fn end_block(&mut self, _data: &SynchronizedData) -> Result<Option<RoundOutcome>, RoundError> {
        Err(RoundError::internal(DEGENERATE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronized::{keys, DEFAULT_CROSS_PERIOD_KEYS};
    use serde_json::json;
    use tessera_state::{AppDb, PeriodData};

    const DONE: Event = Event("done");
    const NO_MAJORITY: Event = Event("no_majority");
    const NONE: Event = Event("none");
    const NEGATIVE: Event = Event("negative");
    const FAIL: Event = Event("fail");

    fn data() -> SynchronizedData {
        let setup: PeriodData = [
            (keys::PARTICIPANTS, json!(["a", "b", "c", "d"])),
            (keys::ALL_PARTICIPANTS, json!(["a", "b", "c", "d"])),
            (keys::CONSENSUS_THRESHOLD, Value::Null),
            (keys::MOST_VOTED_KEEPER_ADDRESS, json!("a")),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), vec![value]))
        .collect();
        let mut db = AppDb::new(setup, DEFAULT_CROSS_PERIOD_KEYS);
        db.set_round_count(0);
        SynchronizedData::new(db)
    }

    fn payload(sender: &str, body: Value) -> Payload {
        Payload::new(sender, "estimate", body).with_round_count(0)
    }

    fn same_round() -> CollectionRound {
        CollectionRound::new(
            RoundSpec::new(
                RoundId("estimate"),
                "estimate",
                CollectionRule::SameUntilThreshold {
                    done: DONE,
                    no_majority: NO_MAJORITY,
                    none: NONE,
                },
            )
            .collection_key("collection")
            .selection_key("estimate"),
        )
    }

    #[test]
    fn test_same_until_threshold_done() {
        let data = data();
        let mut round = same_round();
        for sender in ["a", "b"] {
            round.process_payload(&data, payload(sender, json!(1))).unwrap();
        }
        assert!(round.end_block(&data).unwrap().is_none());

        round.process_payload(&data, payload("c", json!(1))).unwrap();
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, DONE);
        assert_eq!(next.get("estimate"), Some(json!(1)));
        assert_eq!(next.get("collection").unwrap().as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_same_until_threshold_none_and_no_majority() {
        let data = data();
        let mut round = same_round();
        for sender in ["a", "b", "c"] {
            round.process_payload(&data, payload(sender, Value::Null)).unwrap();
        }
        let (_, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, NONE);

        let mut round = same_round();
        for (sender, body) in [("a", 1), ("b", 2), ("c", 3)] {
            round.process_payload(&data, payload(sender, json!(body))).unwrap();
        }
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, NO_MAJORITY);
        assert_eq!(next, data);
    }

    #[test]
    fn test_common_checks() {
        let data = data();
        let mut round = same_round();

        let err = round.check_payload(&data, &payload("z", json!(1))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "z not in list of participants: [\"a\", \"b\", \"c\", \"d\"]"
        );

        round.process_payload(&data, payload("a", json!(1))).unwrap();
        let err = round.check_payload(&data, &payload("a", json!(2))).unwrap_err();
        assert!(matches!(err, RoundError::TransactionNotValid(_)));
        assert_eq!(
            err.to_string(),
            "sender a has already sent value for round: estimate"
        );
        let err = round.process_payload(&data, payload("a", json!(2))).unwrap_err();
        assert!(matches!(err, RoundError::Internal(_)));

        let stale = Payload::new("b", "estimate", json!(1)).with_round_count(7);
        let err = round.check_payload(&data, &stale).unwrap_err();
        assert_eq!(err.to_string(), "Expected round count 0 and got 7.");
    }

    #[test]
    fn test_payload_kind_checks() {
        let round = same_round();
        let other = Payload::new("a", "vote", json!(true)).with_round_count(0);
        let err = check_payload_kind(&round, None, 0, &other).unwrap_err();
        assert_eq!(
            err.to_string(),
            "request 'vote' not recognized; only estimate is supported"
        );

        let late = Payload::new("a", "vote", json!(true)).with_round_count(4);
        let err = check_payload_kind(&round, Some("vote"), 5, &late).unwrap_err();
        assert!(matches!(err, RoundError::LateArrivingTransaction(_)));

        let degenerate = DegenerateRound::new(RoundId("final"));
        let err = check_payload_kind(&degenerate, None, 0, &late).unwrap_err();
        assert_eq!(err.to_string(), "current round does not allow transactions");
    }

    #[test]
    fn test_different_until_all() {
        let data = data();
        let mut round = CollectionRound::new(
            RoundSpec::new(
                RoundId("register"),
                "estimate",
                CollectionRule::DifferentUntilAll { done: DONE },
            )
            .collection_key("registrations"),
        );
        for (sender, body) in [("a", 1), ("b", 2), ("c", 3)] {
            round.process_payload(&data, payload(sender, json!(body))).unwrap();
        }
        assert!(round.check_payload(&data, &payload("d", json!(1))).is_err());
        assert!(round.end_block(&data).unwrap().is_none());

        round.process_payload(&data, payload("d", json!(4))).unwrap();
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, DONE);
        assert!(next.get("registrations").is_some());
    }

    #[test]
    fn test_different_until_threshold_waits_for_confirmations() {
        let data = data();
        let mut round = CollectionRound::new(
            RoundSpec::new(
                RoundId("register"),
                "estimate",
                CollectionRule::DifferentUntilThreshold {
                    done: DONE,
                    required_block_confirmations: 1,
                },
            )
            .selection_key("participants"),
        );
        for sender in ["c", "a", "b"] {
            round.process_payload(&data, payload(sender, json!(sender))).unwrap();
        }
        assert!(round.end_block(&data).unwrap().is_none());
        assert_eq!(round.block_confirmations(), 1);

        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, DONE);
        assert_eq!(next.get("participants"), Some(json!(["a", "b", "c"])));
    }

    #[test]
    fn test_only_keeper_sends() {
        let data = data();
        let spec = RoundSpec::new(
            RoundId("keeper"),
            "estimate",
            CollectionRule::OnlyKeeperSends {
                done: DONE,
                fail: FAIL,
            },
        )
        .selection_key("tx_hash");

        let mut round = CollectionRound::new(spec.clone());
        let err = round.check_payload(&data, &payload("b", json!("0x1"))).unwrap_err();
        assert_eq!(err.to_string(), "b not elected as keeper.");
        assert!(round.end_block(&data).unwrap().is_none());

        round.process_payload(&data, payload("a", json!("0x1"))).unwrap();
        let err = round.check_payload(&data, &payload("a", json!("0x2"))).unwrap_err();
        assert_eq!(err.to_string(), "keeper payload value already set.");
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, DONE);
        assert_eq!(next.get("tx_hash"), Some(json!("0x1")));

        let mut round = CollectionRound::new(spec);
        round.process_payload(&data, payload("a", Value::Null)).unwrap();
        assert_eq!(round.end_block(&data).unwrap().unwrap().1, FAIL);
    }

    #[test]
    fn test_voting() {
        let data = data();
        let spec = RoundSpec::new(
            RoundId("vote"),
            "estimate",
            CollectionRule::Voting {
                done: DONE,
                negative: NEGATIVE,
                none: NONE,
                no_majority: NO_MAJORITY,
            },
        )
        .collection_key("votes");

        let mut round = CollectionRound::new(spec.clone());
        assert!(round.check_payload(&data, &payload("a", json!(3))).is_err());
        for sender in ["a", "b", "c"] {
            round.process_payload(&data, payload(sender, json!(false))).unwrap();
        }
        assert_eq!(round.end_block(&data).unwrap().unwrap().1, NEGATIVE);

        let mut round = CollectionRound::new(spec.clone());
        for sender in ["a", "b", "c"] {
            round.process_payload(&data, payload(sender, json!(true))).unwrap();
        }
        let (next, event) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(event, DONE);
        assert!(next.get("votes").is_some());

        let mut round = CollectionRound::new(spec);
        for (sender, vote) in [("a", json!(true)), ("b", json!(false)), ("c", Value::Null)] {
            round.process_payload(&data, payload(sender, vote)).unwrap();
        }
        assert_eq!(round.end_block(&data).unwrap().unwrap().1, NO_MAJORITY);
    }

    #[test]
    fn test_opens_period() {
        let data = data();
        let mut round = CollectionRound::new(
            RoundSpec::new(
                RoundId("reset"),
                "estimate",
                CollectionRule::SameUntilThreshold {
                    done: DONE,
                    no_majority: NO_MAJORITY,
                    none: NONE,
                },
            )
            .selection_key("period_seed")
            .opens_period(),
        );
        for sender in ["a", "b", "c"] {
            round.process_payload(&data, payload(sender, json!(9))).unwrap();
        }
        let (next, _) = round.end_block(&data).unwrap().unwrap();
        assert_eq!(next.period_count(), 1);
        assert_eq!(next.get("period_seed"), Some(json!(9)));
        assert_eq!(next.nb_participants().unwrap(), 4);
    }

    #[test]
    fn test_degenerate_round() {
        let data = data();
        let mut round = DegenerateRound::new(RoundId("final"));
        assert!(round.payload_kind().is_none());
        assert!(matches!(
            round.end_block(&data),
            Err(RoundError::Internal(_))
        ));
        assert!(round.process_payload(&data, payload("a", json!(1))).is_err());
    }
}
