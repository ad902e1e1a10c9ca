use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tessera_core::serialize;
use tracing::debug;

use crate::error::StateError;

/// Key/value persistence with staged writes.
///
/// Writes stay pending and visible to reads until [`Storage::commit`]
/// applies them or [`Storage::rollback`] discards them.
pub trait Storage: Send + Sync {
    /// Staged value if any, otherwise the committed one
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn put(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    /// Apply every staged write and persist the result
    fn commit(&mut self) -> Result<(), StateError>;

    fn rollback(&mut self);
}

/// Committed entries plus the pending overlay (`None` marks a delete)
#[derive(Debug, Clone, Default)]
struct Staged {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Staged {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(pending) => pending.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    fn stage(&mut self, key: &[u8], value: Option<&[u8]>) {
        self.pending.insert(key.to_vec(), value.map(<[u8]>::to_vec));
    }

    fn apply(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for (key, value) in pending {
            match value {
                Some(value) => {
                    self.committed.insert(key, value);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
        count
    }
}

/// Volatile storage, used in tests and when no data directory is configured
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Staged,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.inner.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.committed.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.inner.stage(key, None);
    }

    fn commit(&mut self) -> Result<(), StateError> {
        self.inner.apply();
        Ok(())
    }

    fn rollback(&mut self) {
        self.inner.pending.clear();
    }
}

/// Storage persisted as one bincode file, rewritten atomically on commit
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    inner: Staged,
}

impl FileStorage {
    /// Open `path`, loading its entries if the file exists
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StateError> {
        let path = path.into();
        let committed = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serialize::from_bytes(&bytes)
                .map_err(|e| StateError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StateError::Storage(e.to_string())),
        };
        debug!(path = %path.display(), keys = committed.len(), "opened file storage");
        Ok(FileStorage {
            path,
            inner: Staged {
                committed,
                pending: BTreeMap::new(),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Storage(e.to_string()))?;
        }
        let bytes = serialize::to_bytes(&self.inner.committed)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| StateError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StateError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.inner.stage(key, None);
    }

    fn commit(&mut self) -> Result<(), StateError> {
        if self.inner.apply() > 0 {
            self.write_snapshot()?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.inner.pending.clear();
    }
}
