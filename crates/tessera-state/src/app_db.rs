//! Period-indexed application database.
//!
//! Every period (one pass of the application from its initial round back to
//! a reset) owns a map of key to value history. Writes within a period are
//! appended to the key's history, so the latest value is always the last
//! element. Period 0 holds the setup data.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use tessera_core::{hash_blake3, serialize, Hash};
use tracing::debug;

use crate::error::StateError;

/// Ordered values written under one key in one period
pub type History = Vec<Value>;

/// Key to history map of a single period
pub type PeriodData = BTreeMap<String, History>;

const DB_DATA: &str = "db_data";
const SLASHING_CONFIG: &str = "slashing_config";

#[derive(Serialize)]
struct SnapshotRef<'a> {
    db_data: &'a BTreeMap<u64, PeriodData>,
    slashing_config: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppDb {
    data: BTreeMap<u64, PeriodData>,
    setup_data: PeriodData,
    cross_period_persisted_keys: BTreeSet<String>,
    round_count: i64,
    slashing_config: String,
}

impl Default for AppDb {
    fn default() -> Self {
        AppDb::new(PeriodData::new(), Vec::<String>::new())
    }
}

impl AppDb {
    /// Create a database whose period 0 is `setup_data`.
    ///
    /// Keys with an empty history are dropped.
    pub fn new<K: Into<String>>(
        setup_data: PeriodData,
        cross_period_persisted_keys: impl IntoIterator<Item = K>,
    ) -> Self {
        let setup_data: PeriodData = setup_data
            .into_iter()
            .filter(|(_, history)| !history.is_empty())
            .collect();
        let mut data = BTreeMap::new();
        data.insert(0, setup_data.clone());
        AppDb {
            data,
            setup_data,
            cross_period_persisted_keys: cross_period_persisted_keys
                .into_iter()
                .map(Into::into)
                .collect(),
            round_count: -1,
            slashing_config: String::new(),
        }
    }

    /// Parse setup data from a JSON object of key to list of values
    pub fn setup_data_from_json(value: &Value) -> Result<PeriodData, StateError> {
        let object = value
            .as_object()
            .ok_or_else(|| StateError::InvalidData(json_type(value).to_string()))?;
        object
            .iter()
            .map(|(key, history)| match history {
                Value::Array(values) => Ok((key.clone(), values.clone())),
                other => Err(StateError::InvalidData(json_type(other).to_string())),
            })
            .collect()
    }

    pub fn setup_data(&self) -> &PeriodData {
        &self.setup_data
    }

    pub fn cross_period_persisted_keys(&self) -> &BTreeSet<String> {
        &self.cross_period_persisted_keys
    }

    pub fn add_cross_period_persisted_keys<K: Into<String>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
    ) {
        self.cross_period_persisted_keys
            .extend(keys.into_iter().map(Into::into));
    }

    /// Every stored period, oldest first
    pub fn periods(&self) -> &BTreeMap<u64, PeriodData> {
        &self.data
    }

    /// Index of the current period
    pub fn reset_index(&self) -> u64 {
        self.data.keys().next_back().copied().unwrap_or(0)
    }

    pub fn round_count(&self) -> i64 {
        self.round_count
    }

    pub fn set_round_count(&mut self, round_count: i64) {
        self.round_count = round_count;
    }

    pub fn increment_round_count(&mut self) {
        self.round_count += 1;
    }

    pub fn slashing_config(&self) -> &str {
        &self.slashing_config
    }

    pub fn set_slashing_config(&mut self, config: impl Into<String>) {
        self.slashing_config = config.into();
    }

    fn current(&self) -> Option<&PeriodData> {
        self.data.get(&self.reset_index())
    }

    /// Latest value of `key` in the current period
    pub fn get(&self, key: &str) -> Option<Value> {
        self.current()
            .and_then(|period| period.get(key))
            .and_then(|history| history.last())
            .cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn get_strict(&self, key: &str) -> Result<Value, StateError> {
        self.get(key)
            .ok_or_else(|| StateError::KeyNotFound(key.to_string()))
    }

    /// Full history of `key` in the current period
    pub fn history(&self, key: &str) -> History {
        self.current()
            .and_then(|period| period.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Latest value of every key in period `reset_index`
    pub fn get_latest_from_reset_index(&self, reset_index: u64) -> BTreeMap<String, Value> {
        self.data
            .get(&reset_index)
            .map(|period| {
                period
                    .iter()
                    .filter_map(|(key, history)| {
                        history.last().map(|value| (key.clone(), value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest value of every key in the current period
    pub fn get_latest(&self) -> BTreeMap<String, Value> {
        self.get_latest_from_reset_index(self.reset_index())
    }

    /// Append each value to its key's history in the current period
    pub fn update<K: Into<String>>(&mut self, entries: impl IntoIterator<Item = (K, Value)>) {
        let index = self.reset_index();
        let period = self.data.entry(index).or_default();
        for (key, value) in entries {
            period.entry(key.into()).or_default().push(value);
        }
    }

    /// Open a new period.
    ///
    /// Cross-period keys are carried over with their latest value unless
    /// `entries` supplies a history for them.
    pub fn create<K: Into<String>>(
        &mut self,
        entries: impl IntoIterator<Item = (K, History)>,
    ) -> Result<(), StateError> {
        let mut overrides: PeriodData = entries
            .into_iter()
            .map(|(key, history)| (key.into(), history))
            .collect();

        let latest = self.get_latest();
        let mut period = PeriodData::new();
        for key in &self.cross_period_persisted_keys {
            if overrides.contains_key(key) {
                continue;
            }
            let value = latest
                .get(key)
                .cloned()
                .ok_or_else(|| StateError::CrossPeriodKeyMissing(key.clone()))?;
            period.insert(key.clone(), vec![value]);
        }
        period.append(&mut overrides);

        let index = self.reset_index() + 1;
        debug!(period = index, keys = period.len(), "opening db period");
        self.data.insert(index, period);
        Ok(())
    }

    /// Keep the last `history_depth` periods (at least the current one) and
    /// optionally trim the current period's histories.
    pub fn cleanup(&mut self, history_depth: usize, current_history_depth: Option<usize>) {
        let keep = history_depth.max(1);
        while self.data.len() > keep {
            self.data.pop_first();
        }
        if let Some(depth) = current_history_depth {
            self.cleanup_current_histories(depth);
        }
    }

    /// Keep the last `depth` values of every key in the current period.
    /// A depth of zero leaves histories untouched.
    pub fn cleanup_current_histories(&mut self, depth: usize) {
        if depth == 0 {
            return;
        }
        let index = self.reset_index();
        if let Some(period) = self.data.get_mut(&index) {
            for history in period.values_mut() {
                if history.len() > depth {
                    history.drain(..history.len() - depth);
                }
            }
        }
    }

    /// JSON snapshot of every period plus the slashing configuration
    pub fn serialize(&self) -> Result<String, StateError> {
        let snapshot = SnapshotRef {
            db_data: &self.data,
            slashing_config: &self.slashing_config,
        };
        Ok(serialize::to_json_spaced(&snapshot)?)
    }

    /// Replace all periods with the content of a [`AppDb::serialize`] snapshot
    pub fn sync(&mut self, serialized: &str) -> Result<(), StateError> {
        let value: Value = serialize::from_json(serialized)?;
        let object = value
            .as_object()
            .ok_or_else(|| StateError::InvalidData(json_type(&value).to_string()))?;

        let missing: Vec<String> = [DB_DATA, SLASHING_CONFIG]
            .into_iter()
            .filter(|key| !object.contains_key(*key))
            .map(|key| format!("`{}`", key))
            .collect();
        if !missing.is_empty() {
            return Err(StateError::MissingSnapshotKeys(missing.join(", ")));
        }

        let db_data = &object[DB_DATA];
        let periods = db_data
            .as_object()
            .ok_or_else(|| StateError::InvalidData(json_type(db_data).to_string()))?;
        let mut data = BTreeMap::new();
        for (index, period) in periods {
            let index: u64 = index
                .parse()
                .map_err(|_| StateError::InvalidIndex(index.clone()))?;
            data.insert(index, Self::setup_data_from_json(period)?);
        }
        if data.is_empty() {
            data.insert(0, PeriodData::new());
        }

        self.slashing_config = match &object[SLASHING_CONFIG] {
            Value::String(config) => config.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        self.data = data;
        Ok(())
    }

    /// blake3 of the serialized snapshot
    pub fn hash(&self) -> Result<Hash, StateError> {
        Ok(hash_blake3(self.serialize()?.as_bytes()))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbers(range: std::ops::Range<i64>) -> History {
        range.map(|n| json!(n)).collect()
    }

    fn periods_of(db: &AppDb) -> BTreeMap<u64, PeriodData> {
        db.periods().clone()
    }

    fn db_with_periods(periods: Vec<PeriodData>) -> AppDb {
        let mut db = AppDb::default();
        for period in periods {
            db.create(period).unwrap();
        }
        db
    }

    fn period(key: &str, history: History) -> PeriodData {
        BTreeMap::from([(key.to_string(), history)])
    }

    #[test]
    fn test_setup_data_drops_empty_histories() {
        let setup = BTreeMap::from([
            ("participants".to_string(), vec![]),
            ("other".to_string(), vec![json!(1), json!(2)]),
        ]);
        let db = AppDb::new(setup, ["test"]);
        assert_eq!(db.setup_data(), &period("other", vec![json!(1), json!(2)]));
        assert_eq!(db.periods().len(), 1);
        assert!(db.cross_period_persisted_keys().contains("test"));
        assert_eq!(db.round_count(), -1);
    }

    #[test]
    fn test_setup_data_from_json() {
        let parsed = AppDb::setup_data_from_json(&json!({"participants": ["a", "b"]})).unwrap();
        assert_eq!(parsed, period("participants", vec![json!("a"), json!("b")]));

        assert!(matches!(
            AppDb::setup_data_from_json(&json!({"participants": "a"})),
            Err(StateError::InvalidData(found)) if found == "string"
        ));
        assert!(AppDb::setup_data_from_json(&json!(["participants"])).is_err());
    }

    #[test]
    fn test_update_appends() {
        let mut db = AppDb::new(period("test", vec![json!("test")]), Vec::<String>::new());
        db.update([("test", json!("dummy_value"))]);
        db.update([("list", json!(["v1", "v2"]))]);

        assert_eq!(db.history("test"), vec![json!("test"), json!("dummy_value")]);
        assert_eq!(db.get("list"), Some(json!(["v1", "v2"])));
        assert_eq!(db.history("list").len(), 1);
    }

    #[test]
    fn test_getters_return_copies() {
        let mut db = AppDb::default();
        db.update([("mutable", json!(["test"]))]);

        if let Some(Value::Array(mut values)) = db.get("mutable") {
            values.push(json!("new_value_attempt"));
        }
        let mut latest = db.get_latest();
        latest.insert("mutable".to_string(), json!("replaced"));

        assert_eq!(db.get_strict("mutable").unwrap(), json!(["test"]));
    }

    #[test]
    fn test_get_strict_missing() {
        let db = AppDb::default();
        let err = db.get_strict("most_voted").unwrap_err();
        assert_eq!(err.to_string(), "'most_voted' field is not set");
        assert_eq!(db.get_or("most_voted", json!(0)), json!(0));
    }

    #[test]
    fn test_increment_round_count() {
        let mut db = AppDb::default();
        db.increment_round_count();
        assert_eq!(db.round_count(), 0);
        db.set_round_count(7);
        assert_eq!(db.round_count(), 7);
    }

    #[test]
    fn test_create_inherits_cross_period_keys() {
        let setup = period("participants", vec![json!(["a", "b"]), json!(["a", "b", "c"])]);
        let mut db = AppDb::new(setup, ["participants"]);
        db.update([("round_value", json!(3))]);

        db.create([("fresh", vec![json!(1)])]).unwrap();
        assert_eq!(db.reset_index(), 1);
        assert_eq!(db.history("participants"), vec![json!(["a", "b", "c"])]);
        assert_eq!(db.get("fresh"), Some(json!(1)));
        assert_eq!(db.get("round_value"), None);
    }

    #[test]
    fn test_create_override_wins() {
        let mut db = AppDb::new(period("participants", vec![json!(["a"])]), ["participants"]);
        db.create([("participants", vec![json!(["b"])])]).unwrap();
        assert_eq!(db.get("participants"), Some(json!(["b"])));
    }

    #[test]
    fn test_create_missing_cross_period_key() {
        let mut db = AppDb::new(PeriodData::new(), ["safe_contract_address"]);
        let err = db.create(Vec::<(String, History)>::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cross period persisted key `safe_contract_address` was not found in the db but was required for the next period."
        );
        assert_eq!(db.reset_index(), 0);
    }

    #[test]
    fn test_cleanup_keeps_current_period_at_depth_zero() {
        let mut db = db_with_periods(vec![
            period("test", vec![json!("test"), json!(["v1", "v2"])]),
            period("test", vec![json!(0)]),
        ]);
        db.cleanup(0, None);
        assert_eq!(periods_of(&db), BTreeMap::from([(2, period("test", vec![json!(0)]))]));
    }

    #[test]
    fn test_cleanup_periods_and_current_histories() {
        let history = || {
            vec![
                period("test", numbers(0..5)),
                period("test", numbers(5..10)),
                period("test", numbers(10..15)),
                period("test", numbers(15..20)),
            ]
        };

        let mut db = db_with_periods(history());
        db.cleanup(3, Some(0));
        assert_eq!(
            periods_of(&db),
            BTreeMap::from([
                (2, period("test", numbers(5..10))),
                (3, period("test", numbers(10..15))),
                (4, period("test", numbers(15..20))),
            ])
        );

        let mut db = db_with_periods(history());
        db.cleanup(2, Some(3));
        assert_eq!(
            periods_of(&db),
            BTreeMap::from([
                (3, period("test", numbers(10..15))),
                (4, period("test", numbers(17..20))),
            ])
        );

        let mut db = db_with_periods(history());
        db.cleanup(0, Some(1));
        assert_eq!(periods_of(&db), BTreeMap::from([(4, period("test", numbers(19..20)))]));
        assert_eq!(db.reset_index(), 4);
    }

    #[test]
    fn test_serialize_layout() {
        let db = AppDb::new(
            period("participants", vec![json!(["a", "b"])]),
            Vec::<String>::new(),
        );
        assert_eq!(
            db.serialize().unwrap(),
            r#"{"db_data": {"0": {"participants": [["a","b"]]}}, "slashing_config": ""}"#
        );
    }

    #[test]
    fn test_sync_restores_periods() {
        let mut source = AppDb::new(
            period("participants", vec![json!(["a", "b"])]),
            ["participants"],
        );
        for n in 0..11 {
            source.create([("n", vec![json!(n)])]).unwrap();
        }
        source.set_slashing_config(r#"{"a": {}}"#);
        let snapshot = source.serialize().unwrap();

        let mut restored = AppDb::default();
        restored.sync(&snapshot).unwrap();
        assert_eq!(restored.periods(), source.periods());
        assert_eq!(restored.slashing_config(), r#"{"a": {}}"#);
        assert_eq!(restored.reset_index(), 11);
        assert_eq!(restored.hash().unwrap(), source.hash().unwrap());
    }

    #[test]
    fn test_sync_rejects_bad_snapshots() {
        let mut db = AppDb::default();

        let err = db.sync(r#"{"db_data": {}}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Mandatory keys `slashing_config` are missing from the deserialized data"
        );

        let err = db
            .sync(r#"{"db_data": {"zero": {}}, "slashing_config": ""}"#)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidIndex(index) if index == "zero"));

        assert!(db.sync("not json").is_err());
    }
}
