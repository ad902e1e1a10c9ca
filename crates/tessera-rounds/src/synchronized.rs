use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tessera_state::{AppDb, History};

use crate::error::RoundError;
use crate::offence::AppOffences;
use crate::quorum::{consensus_threshold, validate_threshold};

/// Well-known database keys
pub mod keys {
    pub const PARTICIPANTS: &str = "participants";
    pub const ALL_PARTICIPANTS: &str = "all_participants";
    pub const CONSENSUS_THRESHOLD: &str = "consensus_threshold";
    pub const MOST_VOTED_KEEPER_ADDRESS: &str = "most_voted_keeper_address";
    pub const VALIDATOR_TO_AGENT: &str = "validator_to_agent";
    pub const BLACKLISTED_KEEPERS: &str = "blacklisted_keepers";
    pub const SUSPECTS: &str = "suspects";
    pub const INVALID_PAYLOADS: &str = "invalid_payloads";
    pub const SLASHING_IN_FLIGHT: &str = "slashing_in_flight";
    pub const SLASHING_MAJORITY_REACHED: &str = "slashing_majority_reached";
    pub const OPERATORS_MAPPING: &str = "operators_mapping";
    pub const SLASH_TIMESTAMPS: &str = "slash_timestamps";
    pub const TERMINATION_MAJORITY_REACHED: &str = "termination_majority_reached";
    pub const MOST_VOTED_TX_HASH: &str = "most_voted_tx_hash";
}

/// Keys every application carries from one period to the next
pub const DEFAULT_CROSS_PERIOD_KEYS: [&str; 3] = [
    keys::PARTICIPANTS,
    keys::ALL_PARTICIPANTS,
    keys::CONSENSUS_THRESHOLD,
];

/// Read view of the agreed application state.
///
/// Rounds never mutate it in place: [`SynchronizedData::update`] and
/// [`SynchronizedData::create`] return the next version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynchronizedData {
    db: AppDb,
}

impl SynchronizedData {
    pub fn new(db: AppDb) -> Self {
        SynchronizedData { db }
    }

    pub fn db(&self) -> &AppDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut AppDb {
        &mut self.db
    }

    pub fn into_db(self) -> AppDb {
        self.db
    }

    pub fn update<K: Into<String>>(&self, entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut next = self.clone();
        next.db.update(entries);
        next
    }

    /// Next version living in a fresh period
    pub fn create<K: Into<String>>(
        &self,
        entries: impl IntoIterator<Item = (K, History)>,
    ) -> Result<Self, RoundError> {
        let mut next = self.clone();
        next.db.create(entries)?;
        Ok(next)
    }

    pub fn round_count(&self) -> i64 {
        self.db.round_count()
    }

    pub fn period_count(&self) -> u64 {
        self.db.reset_index()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.db.get(key)
    }

    pub fn get_strict(&self, key: &str) -> Result<Value, RoundError> {
        Ok(self.db.get_strict(key)?)
    }

    /// Strings stored under `key`, empty when unset or not a list
    pub fn string_set(&self, key: &str) -> BTreeSet<String> {
        match self.db.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    pub fn participants(&self) -> Result<BTreeSet<String>, RoundError> {
        let participants = self.string_set(keys::PARTICIPANTS);
        if participants.is_empty() {
            return Err(RoundError::internal("List participants cannot be empty."));
        }
        Ok(participants)
    }

    pub fn nb_participants(&self) -> Result<usize, RoundError> {
        Ok(self.participants()?.len())
    }

    /// Every registered agent, falling back to the active participants
    pub fn all_participants(&self) -> Result<BTreeSet<String>, RoundError> {
        let all = self.string_set(keys::ALL_PARTICIPANTS);
        if all.is_empty() {
            return self.participants();
        }
        Ok(all)
    }

    /// Configured threshold if set, otherwise the default for the current
    /// participants
    pub fn consensus_threshold(&self) -> Result<usize, RoundError> {
        let nb_participants = self.nb_participants()?;
        match self.db.get(keys::CONSENSUS_THRESHOLD) {
            Some(Value::Number(n)) => {
                let threshold = n.as_u64().ok_or_else(|| {
                    RoundError::internal(format!("invalid consensus threshold {}", n))
                })?;
                validate_threshold(threshold as usize, nb_participants)
            }
            _ => Ok(consensus_threshold(nb_participants)),
        }
    }

    pub fn most_voted_keeper_address(&self) -> Result<String, RoundError> {
        match self.get_strict(keys::MOST_VOTED_KEEPER_ADDRESS)? {
            Value::String(address) => Ok(address),
            other => Err(RoundError::internal(format!(
                "invalid keeper address {}",
                other
            ))),
        }
    }

    /// Validator address (hex) to agent address mapping
    pub fn validator_to_agent(&self) -> Result<BTreeMap<String, String>, RoundError> {
        let value = self.get_strict(keys::VALIDATOR_TO_AGENT)?;
        serde_json::from_value(value)
            .map_err(|e| RoundError::internal(format!("invalid validator_to_agent mapping: {}", e)))
    }

    pub fn app_offences(&self) -> AppOffences {
        AppOffences {
            blacklisted: self.string_set(keys::BLACKLISTED_KEEPERS),
            suspected: self.string_set(keys::SUSPECTS),
            invalid_payload: self.string_set(keys::INVALID_PAYLOADS),
        }
    }
}
