use thiserror::Error;

/// Failures of the varint/frame layer
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode varint: {0}")]
    EncodeVarint(String),

    #[error("could not decode varint")]
    DecodeVarint,

    #[error("varint overflows the maximum representable length")]
    VarintOverflow,

    #[error("declared message length {length} exceeds the maximum of {max} bytes")]
    TooLargeVarint { length: u64, max: usize },

    #[error("short buffer: message declares {expected} bytes but only {available} are available")]
    ShortBuffer { expected: u64, available: usize },

    #[error("end of stream")]
    Eof,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AbciError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid channel transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Unknown request id: {0}")]
    UnknownRequest(u64),

    #[error("Peer is gone: {0}")]
    PeerGone(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
