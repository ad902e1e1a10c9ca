use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid sender address: {0}")]
    InvalidAddress(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("{what} is {size} bytes, must be smaller than {max} bytes")]
    TooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    #[error("Timestamp overflow")]
    TimestampOverflow,

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
