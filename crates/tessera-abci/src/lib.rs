//! Tessera ABCI - Socket transport for the consensus engine
//!
//! This crate provides the varint framing, the protobuf wire schema and its
//! translation to internal messages, the multi-socket TCP channel, and the
//! handler trait the application implements.

pub mod channel;
pub mod codec;
pub mod error;
pub mod handler;
pub mod server;
pub mod translator;
pub mod wire;

pub use channel::{ChannelState, Envelope, PeerKey, TcpChannel};
pub use codec::{
    decode_varint, encode_varint, read_frame, write_frame, FrameCodec, MAX_READ_IN_BYTES,
};
pub use error::{AbciError, CodecError};
pub use handler::{dispatch, AbciHandler, HandlerError, HandlerResult};
pub use server::serve;
pub use translator::{decode_request, decode_response, encode_request, encode_response, NoMatch};
