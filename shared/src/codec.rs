//! Length-prefixed codec for RCON framing
//!
//! All packets are framed as:
//! ```text
//! [ 4 bytes: size (i32, LE) ][ 4 bytes: id (i32, LE) ][ 4 bytes: type (i32, LE) ][ body ][ 0x00 ][ 0x00 ]
//! ```
//!
//! `size` counts everything after the size field itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Packet;

/// Largest packet a client may send
pub const MAX_PACKET_SIZE: usize = 4096;

/// Largest size field accepted from a backend
pub const MAX_INBOUND_SIZE: i32 = 64 * 1024;

/// Smallest valid size field (id + type + two terminators)
pub const MIN_PACKET_SIZE: i32 = 10;

/// Response bodies this long may continue in a further packet with the same id
pub const MAX_FRAGMENT_BODY: usize = MAX_PACKET_SIZE - MIN_PACKET_SIZE as usize;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Packet too large: {0} bytes (max: {MAX_PACKET_SIZE})")]
    PacketTooLarge(usize),

    #[error("Invalid packet size field: {0}")]
    InvalidLength(i32),

    #[error("Packet {id} is missing its NUL terminator")]
    MissingTerminator { id: i32 },
}

/// Encode a packet into a length-prefixed byte buffer
pub fn encode(packet: &Packet) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(4 + packet.wire_size());
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet directly into a provided buffer
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), CodecError> {
    let size = packet.wire_size();

    if size > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(size));
    }

    buf.reserve(4 + size);
    buf.put_i32_le(size as i32);
    buf.put_i32_le(packet.id);
    buf.put_i32_le(packet.kind);
    buf.put_slice(&packet.body);
    buf.put_u16(0);

    Ok(())
}

/// Try to decode one packet from a buffer
///
/// Returns:
/// - `Ok(Some(packet))` if a complete packet was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the size field without consuming
    let size = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if !(MIN_PACKET_SIZE..=MAX_INBOUND_SIZE).contains(&size) {
        return Err(CodecError::InvalidLength(size));
    }

    let total_len = 4 + size as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let mut frame = buf.split_to(size as usize);

    let id = frame.get_i32_le();
    let kind = frame.get_i32_le();

    // What remains is body + two terminators
    let body_len = frame.len() - 2;
    if frame[body_len..] != [0, 0] {
        return Err(CodecError::MissingTerminator { id });
    }
    let body = frame.split_to(body_len).freeze();

    Ok(Some(Packet { id, kind, body }))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next packet from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete packets
    pub fn decode_next(&mut self) -> Result<Option<Packet>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encoder for batching several packets into one write
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buffer: BytesMut,
}

impl FrameEncoder {
    /// Create a new frame encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Encode a packet and add it to the output buffer
    pub fn encode(&mut self, packet: &Packet) -> Result<(), CodecError> {
        encode_into(packet, &mut self.buffer)
    }

    /// Take the encoded bytes, leaving an empty buffer
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Check if the encoder has any pending data
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
