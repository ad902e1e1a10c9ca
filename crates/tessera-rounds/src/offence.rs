//! Per-agent offence tracking and slash amount computation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tessera_core::types::abci::{Evidence, EvidenceKind, VoteInfo};
use tracing::debug;

use crate::error::RoundError;

/// Blocks kept in the downtime window
pub const NUMBER_OF_BLOCKS_TRACKED: usize = 10_000;
/// Rounds kept in the application offence windows
pub const NUMBER_OF_ROUNDS_TRACKED: usize = 50;
/// A full window with at least this share of positives is "bad"
pub const BAD_AVAILABILITY_PERCENT: usize = 95;

#[derive(Serialize, Deserialize)]
struct WindowRepr {
    max_length: usize,
    array: Vec<bool>,
}

/// Fixed-capacity sliding window of booleans with running counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WindowRepr", into = "WindowRepr")]
pub struct AvailabilityWindow {
    max_length: usize,
    window: VecDeque<bool>,
    num_positive: usize,
    num_negative: usize,
}

impl AvailabilityWindow {
    pub fn new(max_length: usize) -> Self {
        AvailabilityWindow {
            max_length,
            window: VecDeque::with_capacity(max_length.min(NUMBER_OF_ROUNDS_TRACKED)),
            num_positive: 0,
            num_negative: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn num_positive(&self) -> usize {
        self.num_positive
    }

    pub fn num_negative(&self) -> usize {
        self.num_negative
    }

    /// Push `value`, evicting the oldest entry once the window is full
    pub fn add(&mut self, value: bool) {
        if self.max_length == 0 {
            return;
        }
        if self.window.len() == self.max_length {
            if let Some(evicted) = self.window.pop_front() {
                self.count(evicted, false);
            }
        }
        self.window.push_back(value);
        self.count(value, true);
    }

    fn count(&mut self, value: bool, added: bool) {
        let counter = if value {
            &mut self.num_positive
        } else {
            &mut self.num_negative
        };
        if added {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    pub fn has_bad_availability_rate(&self) -> bool {
        self.max_length > 0
            && self.window.len() == self.max_length
            && self.num_positive * 100 >= BAD_AVAILABILITY_PERCENT * self.max_length
    }
}

impl From<WindowRepr> for AvailabilityWindow {
    fn from(repr: WindowRepr) -> Self {
        let mut window = AvailabilityWindow::new(repr.max_length);
        for value in repr.array {
            window.add(value);
        }
        window
    }
}

impl From<AvailabilityWindow> for WindowRepr {
    fn from(window: AvailabilityWindow) -> Self {
        WindowRepr {
            max_length: window.max_length,
            array: window.window.into_iter().collect(),
        }
    }
}

/// Offence record of a single agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffenceStatus {
    pub validator_downtime: AvailabilityWindow,
    pub invalid_payload: AvailabilityWindow,
    pub blacklisted: AvailabilityWindow,
    pub suspected: AvailabilityWindow,
    pub num_unknown_offenses: u64,
    pub num_double_signed: u64,
    pub num_light_client_attack: u64,
    pub custom_offences_amount: u64,
}

impl Default for OffenceStatus {
    fn default() -> Self {
        OffenceStatus {
            validator_downtime: AvailabilityWindow::new(NUMBER_OF_BLOCKS_TRACKED),
            invalid_payload: AvailabilityWindow::new(NUMBER_OF_ROUNDS_TRACKED),
            blacklisted: AvailabilityWindow::new(NUMBER_OF_ROUNDS_TRACKED),
            suspected: AvailabilityWindow::new(NUMBER_OF_ROUNDS_TRACKED),
            num_unknown_offenses: 0,
            num_double_signed: 0,
            num_light_client_attack: 0,
            custom_offences_amount: 0,
        }
    }
}

impl OffenceStatus {
    /// One light unit per bad window plus one serious unit per discrete
    /// offence, plus the custom amount
    pub fn slash_amount(&self, light_unit_amount: u64, serious_unit_amount: u64) -> u64 {
        let light_multiplier = [
            &self.validator_downtime,
            &self.invalid_payload,
            &self.blacklisted,
            &self.suspected,
        ]
        .iter()
        .filter(|window| window.has_bad_availability_rate())
        .count() as u64;
        let serious_multiplier =
            self.num_unknown_offenses + self.num_double_signed + self.num_light_client_attack;

        light_multiplier * light_unit_amount
            + serious_multiplier * serious_unit_amount
            + self.custom_offences_amount
    }
}

/// Application-level offences reported by the last round
#[derive(Debug, Clone, Default)]
pub struct AppOffences {
    pub blacklisted: BTreeSet<String>,
    pub suspected: BTreeSet<String>,
    pub invalid_payload: BTreeSet<String>,
}

/// Offence records of every observed agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffenceTracker {
    statuses: BTreeMap<String, OffenceStatus>,
}

impl OffenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> &BTreeMap<String, OffenceStatus> {
        &self.statuses
    }

    pub fn status(&self, agent: &str) -> Option<&OffenceStatus> {
        self.statuses.get(agent)
    }

    pub fn status_mut(&mut self, agent: &str) -> &mut OffenceStatus {
        self.statuses.entry(agent.to_string()).or_default()
    }

    /// Forget everything recorded against `agent`
    pub fn reset(&mut self, agent: &str) {
        self.statuses.remove(agent);
    }

    /// Feed the downtime windows from the last commit's votes.
    ///
    /// `validator_to_agent` maps hex validator addresses to agent addresses.
    pub fn track_votes(
        &mut self,
        votes: &[VoteInfo],
        validator_to_agent: &BTreeMap<String, String>,
    ) -> Result<(), RoundError> {
        let mut updates = Vec::with_capacity(votes.len());
        for vote in votes {
            let Some(validator) = &vote.validator else {
                continue;
            };
            let agent = lookup_agent(&validator.address, validator_to_agent)?;
            updates.push((agent, !vote.signed_last_block));
        }
        for (agent, missed) in updates {
            self.status_mut(&agent).validator_downtime.add(missed);
        }
        Ok(())
    }

    /// Count byzantine evidence reported by the consensus engine
    pub fn track_evidence(
        &mut self,
        evidence: &[Evidence],
        validator_to_agent: &BTreeMap<String, String>,
    ) -> Result<(), RoundError> {
        for item in evidence {
            let Some(validator) = &item.validator else {
                continue;
            };
            let agent = lookup_agent(&validator.address, validator_to_agent)?;
            let status = self.status_mut(&agent);
            match item.kind {
                EvidenceKind::Unknown => status.num_unknown_offenses += 1,
                EvidenceKind::DuplicateVote => status.num_double_signed += 1,
                EvidenceKind::LightClientAttack => status.num_light_client_attack += 1,
            }
            debug!(agent = %agent, kind = ?item.kind, height = item.height, "evidence recorded");
        }
        Ok(())
    }

    /// Feed the application offence windows once per round transition
    pub fn track_app_offences(&mut self, participants: &BTreeSet<String>, offences: &AppOffences) {
        for agent in participants {
            let status = self.status_mut(agent);
            status.blacklisted.add(offences.blacklisted.contains(agent));
            status.suspected.add(offences.suspected.contains(agent));
            status
                .invalid_payload
                .add(offences.invalid_payload.contains(agent));
        }
    }

    pub fn slash_amounts(&self, light_unit_amount: u64, serious_unit_amount: u64) -> BTreeMap<String, u64> {
        self.statuses
            .iter()
            .map(|(agent, status)| {
                (
                    agent.clone(),
                    status.slash_amount(light_unit_amount, serious_unit_amount),
                )
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, RoundError> {
        serde_json::to_string(&self.statuses).map_err(|e| RoundError::internal(e.to_string()))
    }

    /// Parse the output of [`OffenceTracker::to_json`]; an empty string is
    /// an empty tracker
    pub fn from_json(serialized: &str) -> Result<Self, RoundError> {
        if serialized.is_empty() {
            return Ok(Self::default());
        }
        let statuses = serde_json::from_str(serialized)
            .map_err(|e| RoundError::internal(format!("invalid slashing config: {}", e)))?;
        Ok(OffenceTracker { statuses })
    }
}

fn lookup_agent(
    validator_address: &[u8],
    validator_to_agent: &BTreeMap<String, String>,
) -> Result<String, RoundError> {
    let address = hex::encode(validator_address);
    validator_to_agent.get(&address).cloned().ok_or_else(|| {
        RoundError::internal(format!(
            "validator {} is not mapped to any agent",
            address
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::abci::Validator;

    fn mapping() -> BTreeMap<String, String> {
        BTreeMap::from([
            (hex::encode([1u8; 20]), "agent_1".to_string()),
            (hex::encode([2u8; 20]), "agent_2".to_string()),
        ])
    }

    fn validator(byte: u8) -> Option<Validator> {
        Some(Validator {
            address: vec![byte; 20],
            power: 10,
        })
    }

    #[test]
    fn test_window_counts_stay_consistent() {
        let mut window = AvailabilityWindow::new(4);
        let values = [true, false, true, true, false, false, true, true, true];
        for (i, value) in values.iter().enumerate() {
            window.add(*value);
            assert_eq!(window.num_positive() + window.num_negative(), window.len());
            assert_eq!(window.len(), (i + 1).min(4));
        }
        assert_eq!(window.num_positive(), 3);
        assert_eq!(window.num_negative(), 1);
    }

    #[test]
    fn test_bad_rate_requires_full_window() {
        let mut window = AvailabilityWindow::new(20);
        for _ in 0..19 {
            window.add(true);
        }
        assert!(!window.has_bad_availability_rate());
        window.add(false);
        assert!(window.has_bad_availability_rate());
        window.add(false);
        assert!(!window.has_bad_availability_rate());
    }

    #[test]
    fn test_slash_amount() {
        let mut status = OffenceStatus::default();
        for _ in 0..NUMBER_OF_BLOCKS_TRACKED {
            status.validator_downtime.add(true);
        }
        assert_eq!(status.slash_amount(1, 2), 1);

        status.num_double_signed = 2;
        status.num_light_client_attack = 1;
        assert_eq!(status.slash_amount(1, 2), 7);

        status.custom_offences_amount = 10;
        assert_eq!(status.slash_amount(1, 2), 17);
    }

    #[test]
    fn test_track_votes_and_evidence() {
        let mut tracker = OffenceTracker::new();
        let votes = vec![
            VoteInfo {
                validator: validator(1),
                signed_last_block: true,
            },
            VoteInfo {
                validator: validator(2),
                signed_last_block: false,
            },
        ];
        tracker.track_votes(&votes, &mapping()).unwrap();
        assert_eq!(tracker.status("agent_1").unwrap().validator_downtime.num_negative(), 1);
        assert_eq!(tracker.status("agent_2").unwrap().validator_downtime.num_positive(), 1);

        let evidence = vec![Evidence {
            kind: EvidenceKind::DuplicateVote,
            validator: validator(2),
            height: 3,
            ..Default::default()
        }];
        tracker.track_evidence(&evidence, &mapping()).unwrap();
        assert_eq!(tracker.status("agent_2").unwrap().num_double_signed, 1);
        assert_eq!(tracker.slash_amounts(1, 5)["agent_2"], 5);
    }

    #[test]
    fn test_unmapped_validator_leaves_tracker_untouched() {
        let mut tracker = OffenceTracker::new();
        let votes = vec![
            VoteInfo {
                validator: validator(1),
                signed_last_block: false,
            },
            VoteInfo {
                validator: validator(9),
                signed_last_block: true,
            },
        ];
        let err = tracker.track_votes(&votes, &mapping()).unwrap_err();
        assert!(err.to_string().contains("is not mapped to any agent"));
        assert!(tracker.statuses().is_empty());
    }

    #[test]
    fn test_app_offences_and_json() {
        let participants: BTreeSet<String> = ["agent_1", "agent_2"].iter().map(|s| s.to_string()).collect();
        let offences = AppOffences {
            blacklisted: BTreeSet::from(["agent_1".to_string()]),
            ..Default::default()
        };
        let mut tracker = OffenceTracker::new();
        tracker.track_app_offences(&participants, &offences);
        assert_eq!(tracker.status("agent_1").unwrap().blacklisted.num_positive(), 1);
        assert_eq!(tracker.status("agent_2").unwrap().blacklisted.num_negative(), 1);

        let json = tracker.to_json().unwrap();
        assert_eq!(OffenceTracker::from_json(&json).unwrap(), tracker);
        assert!(OffenceTracker::from_json("").unwrap().statuses().is_empty());
        assert!(OffenceTracker::from_json("{").is_err());
    }
}
