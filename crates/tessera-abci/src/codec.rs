//! Varint length prefixes and message framing.
//!
//! Every message on the ABCI socket is preceded by its byte length, written
//! as a protobuf varint of `length << 1` (7 bits per byte, least significant
//! group first, high bit set on every byte but the last).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Largest frame body accepted from the consensus engine
pub use tessera_core::MAX_READ_IN_BYTES;

/// A shifted `u64` never needs more than ten 7-bit groups
const MAX_VARINT_BYTES: usize = 10;

/// Encode `value` as a shifted varint.
///
/// Accepts any integer type; negative values and values that do not fit
/// in 64 bits are rejected.
pub fn encode_varint<T>(value: T) -> Result<Vec<u8>, CodecError>
where
    T: TryInto<u64> + Copy + std::fmt::Display,
{
    let raw: u64 = value
        .try_into()
        .map_err(|_| CodecError::EncodeVarint(format!("{} is out of range", value)))?;
    let mut shifted = u128::from(raw) << 1;
    let mut out = Vec::with_capacity(MAX_VARINT_BYTES);
    loop {
        let group = (shifted & 0x7f) as u8;
        shifted >>= 7;
        if shifted == 0 {
            out.push(group);
            return Ok(out);
        }
        out.push(group | 0x80);
    }
}

/// Decode one shifted varint from the front of `buf`.
///
/// An empty buffer is [`CodecError::Eof`]; a buffer that ends mid-varint is
/// [`CodecError::DecodeVarint`].
pub fn decode_varint<B: Buf>(buf: &mut B) -> Result<u64, CodecError> {
    let mut accumulated: u128 = 0;
    let mut index = 0;
    loop {
        if index >= MAX_VARINT_BYTES {
            return Err(CodecError::VarintOverflow);
        }
        if !buf.has_remaining() {
            return Err(if index == 0 {
                CodecError::Eof
            } else {
                CodecError::DecodeVarint
            });
        }
        let byte = buf.get_u8();
        accumulated |= u128::from(byte & 0x7f) << (7 * index);
        index += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    u64::try_from(accumulated >> 1).map_err(|_| CodecError::VarintOverflow)
}

/// Read one length-prefixed frame body from `buf`.
///
/// Fails with [`CodecError::ShortBuffer`] instead of waiting when fewer bytes
/// than declared are present.
pub fn read_frame<B: Buf>(buf: &mut B) -> Result<Bytes, CodecError> {
    let length = decode_varint(buf)?;
    if length > MAX_READ_IN_BYTES as u64 {
        return Err(CodecError::TooLargeVarint {
            length,
            max: MAX_READ_IN_BYTES,
        });
    }
    if (buf.remaining() as u64) < length {
        return Err(CodecError::ShortBuffer {
            expected: length,
            available: buf.remaining(),
        });
    }
    Ok(buf.copy_to_bytes(length as usize))
}

/// Append `message` with its length prefix to `dst`
pub fn write_frame<M: Message>(message: &M, dst: &mut BytesMut) -> Result<(), CodecError> {
    let body = message.encode_to_vec();
    let prefix = encode_varint(body.len())?;
    dst.reserve(prefix.len() + body.len());
    dst.put_slice(&prefix);
    dst.put_slice(&body);
    Ok(())
}

/// Stream codec yielding raw frame bodies.
///
/// Protobuf decoding is left to the caller so that one malformed message can
/// be skipped without poisoning the stream. Frame-level errors are fatal to
/// the connection, since the byte stream can no longer be resynchronised.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        let mut view: &[u8] = &src[..];
        match read_frame(&mut view) {
            Ok(frame) => {
                let consumed = src.len() - view.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(CodecError::Eof) | Err(CodecError::DecodeVarint) => Ok(None),
            Err(CodecError::ShortBuffer {
                expected,
                available,
            }) => {
                src.reserve(expected as usize - available);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl<M: Message> Encoder<M> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), CodecError> {
        write_frame(&item, dst)
    }
}
