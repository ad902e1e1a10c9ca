use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{hash_blake3, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;

/// Round count carried by payloads that were never stamped
pub const UNSTAMPED_ROUND_COUNT: i64 = -1;

/// Largest frame body the consensus engine socket accepts. Payloads and
/// transactions must encode to fewer bytes than this.
pub const MAX_READ_IN_BYTES: usize = 1 << 20;

fn check_size(what: &'static str, size: usize) -> Result<(), CoreError> {
    if size >= MAX_READ_IN_BYTES {
        return Err(CoreError::TooLarge {
            what,
            size,
            max: MAX_READ_IN_BYTES,
        });
    }
    Ok(())
}

/// One participant's contribution to a round.
///
/// `kind` names the payload type a round expects; `body` holds the value the
/// participants try to agree on. Two payloads are equal when their kind and
/// body match; sender, round count and id are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub sender: String,
    pub round_count: i64,
    pub kind: String,
    pub id: String,
    pub body: Value,
}

impl Payload {
    pub fn new(sender: impl Into<String>, kind: impl Into<String>, body: Value) -> Self {
        Payload {
            sender: sender.into(),
            round_count: UNSTAMPED_ROUND_COUNT,
            kind: kind.into(),
            id: fresh_id(),
            body,
        }
    }

    /// Copy of this payload stamped with `round_count`
    pub fn with_round_count(&self, round_count: i64) -> Self {
        Payload {
            round_count,
            ..self.clone()
        }
    }

    /// Copy of this payload with a fresh unique id
    pub fn with_new_id(&self) -> Self {
        Payload {
            id: fresh_id(),
            ..self.clone()
        }
    }

    /// The value compared when counting votes
    pub fn values(&self) -> &Value {
        &self.body
    }

    /// Stable string form of [`Payload::values`], usable as a map key
    pub fn vote_key(&self) -> String {
        self.body.to_string()
    }

    /// Canonical JSON bytes, rejected when they cannot fit in a frame
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let bytes = serialize::to_json_bytes(self)?;
        check_size("payload", bytes.len())?;
        Ok(bytes)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.body == other.body
    }
}

impl Eq for Payload {}

fn fresh_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A payload signed by its sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: Payload,
    pub signature: Sig,
}

impl Transaction {
    /// Sign `payload` with the sender's key
    pub fn sign(payload: Payload, secret_key: &SecretKey) -> Result<Self, CoreError> {
        let bytes = payload.encode()?;
        let signature = secret_key.sign(&bytes);
        Ok(Transaction { payload, signature })
    }

    /// Bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_json_bytes(&self.payload)
    }

    /// Verify that the payload was signed by its declared sender
    pub fn verify(&self) -> Result<(), CoreError> {
        let sender = PublicKey::from_address(&self.payload.sender)?;
        sender.verify(&self.signing_bytes()?, &self.signature)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let bytes = serialize::to_json_bytes(self)?;
        check_size("transaction", bytes.len())?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_json_bytes(bytes)
    }

    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_blake3(&self.encode()?))
    }
}
