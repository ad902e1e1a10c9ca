use serde::{Deserialize, Serialize};
use tessera_core::{serialize, Timestamp};
use tracing::{debug, info};

use crate::app_db::AppDb;
use crate::error::StateError;
use crate::storage::Storage;

mod keys {
    pub const DB: &[u8] = b"app:db";
    pub const CHECKPOINT: &[u8] = b"app:checkpoint";
}

/// Metadata of the last round transition, written at every commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_transition_timestamp: Option<Timestamp>,
    pub last_transition_height: u64,
    pub last_transition_root_hash: Vec<u8>,
    pub last_transition_tm_height: Option<i64>,
    pub block_height: u64,
    pub round_count: i64,
    pub current_round_id: Option<String>,
}

/// Saves and restores the database snapshot with its checkpoint
pub struct CheckpointStore<S: Storage> {
    storage: S,
}

impl<S: Storage> CheckpointStore<S> {
    pub fn new(storage: S) -> Self {
        CheckpointStore { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Write both entries and commit them together
    pub fn save(&mut self, db: &AppDb, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let snapshot = db.serialize()?;
        let meta = serialize::to_bytes(checkpoint)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        self.storage.put(keys::DB, snapshot.as_bytes());
        self.storage.put(keys::CHECKPOINT, &meta);
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }
        debug!(
            height = checkpoint.block_height,
            round_count = checkpoint.round_count,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the saved checkpoint and sync `db` from the saved snapshot.
    ///
    /// Returns `None`, leaving `db` untouched, when nothing was saved yet.
    pub fn restore(&self, db: &mut AppDb) -> Result<Option<Checkpoint>, StateError> {
        let (Some(snapshot), Some(meta)) = (
            self.storage.get(keys::DB),
            self.storage.get(keys::CHECKPOINT),
        ) else {
            return Ok(None);
        };
        let snapshot =
            String::from_utf8(snapshot).map_err(|e| StateError::Serialization(e.to_string()))?;
        let checkpoint: Checkpoint = serialize::from_bytes(&meta)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        db.sync(&snapshot)?;
        db.set_round_count(checkpoint.round_count);
        info!(
            height = checkpoint.block_height,
            period = db.reset_index(),
            "restored application state"
        );
        Ok(Some(checkpoint))
    }

    /// Drop any saved state
    pub fn clear(&mut self) -> Result<(), StateError> {
        self.storage.delete(keys::DB);
        self.storage.delete(keys::CHECKPOINT);
        self.storage.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_restore_without_save() {
        let store = CheckpointStore::new(MemoryStorage::new());
        let mut db = AppDb::default();
        assert!(store.restore(&mut db).unwrap().is_none());
        assert_eq!(db, AppDb::default());
    }

    #[test]
    fn test_save_then_restore() {
        let setup = BTreeMap::from([("participants".to_string(), vec![json!(["a", "b"])])]);
        let mut db = AppDb::new(setup, ["participants"]);
        db.create([("value", vec![json!(1)])]).unwrap();
        db.set_round_count(4);

        let checkpoint = Checkpoint {
            last_transition_timestamp: Some(Timestamp::from_secs(1_700_000_000)),
            last_transition_height: 9,
            last_transition_root_hash: vec![1, 2, 3],
            last_transition_tm_height: Some(12),
            block_height: 10,
            round_count: 4,
            current_round_id: Some("collect".to_string()),
        };

        let mut store = CheckpointStore::new(MemoryStorage::new());
        store.save(&db, &checkpoint).unwrap();
        assert_eq!(store.storage().len(), 2);

        let mut restored = AppDb::default();
        let loaded = store.restore(&mut restored).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(restored.periods(), db.periods());
        assert_eq!(restored.round_count(), 4);

        store.clear().unwrap();
        assert!(store.restore(&mut AppDb::default()).unwrap().is_none());
    }
}
