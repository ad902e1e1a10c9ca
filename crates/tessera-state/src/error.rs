use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Cross period persisted key `{0}` was not found in the db but was required for the next period.")]
    CrossPeriodKeyMissing(String),

    #[error("AppDb data must be a map of key to list of values, found `{0}` instead.")]
    InvalidData(String),

    #[error("'{0}' field is not set")]
    KeyNotFound(String),

    #[error("Mandatory keys {0} are missing from the deserialized data")]
    MissingSnapshotKeys(String),

    #[error("An invalid index `{0}` was found while trying to sync the db")]
    InvalidIndex(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Core error: {0}")]
    Core(#[from] tessera_core::CoreError),
}
