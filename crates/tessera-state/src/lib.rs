//! Tessera State - Versioned application database and persistence
//!
//! This crate provides the period-indexed database that rounds read and
//! write, plus the key/value storage used to recover it after a restart.

pub mod app_db;
pub mod checkpoint;
pub mod error;
pub mod storage;

pub use app_db::{AppDb, History, PeriodData};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::StateError;
pub use storage::{FileStorage, MemoryStorage, Storage};
