//! Tessera Core - Shared types, cryptography, and serialization
//!
//! This crate provides the agent identities, signed payload transactions and
//! the internal representation of ABCI requests and responses used by every
//! other Tessera crate.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{hash_blake3, Hash, KeyPair, PublicKey, SecretKey, Sig};
pub use error::CoreError;
pub use types::*;
