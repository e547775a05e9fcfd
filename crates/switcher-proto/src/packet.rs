//! Datagram envelope codec (C2).
//!
//! Wire layout (big-endian), 12-byte header:
//! `byte 0..1 = (flags << 11) | (length & 0x07FF)` | `byte 2..3 = session id`
//! | `byte 4..5 = acked packet id` | `byte 6..9 = reserved` | `byte 10..11 = packet id`
//! | `byte 12.. = payload`.

use bytes::Bytes;
use thiserror::Error;

use crate::frame::{Frame, FrameError};

/// Size of the envelope header.
pub const ENVELOPE_HEADER_LEN: usize = 12;

/// The length field is 11 bits wide.
pub const MAX_ENVELOPE_LEN: usize = 0x07FF;

/// Envelope flag bits.
pub mod flags {
    /// Payload carries one or more command frames.
    pub const COMMAND: u8 = 0x01;
    /// Handshake packet; payload (if any) is an opaque blob.
    pub const INIT: u8 = 0x02;
    /// This is a retransmission of a previously sent packet.
    pub const RETRANSMIT: u8 = 0x04;
    /// Reserved, always zero on emit.
    pub const RESERVED: u8 = 0x08;
    /// `acked_packet_id` is meaningful.
    pub const ACK: u8 = 0x10;

    /// All bits the 5-bit flag field can hold.
    pub const MASK: u8 = 0x1F;
}

/// A parsed or to-be-sent datagram envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Flag bitset (low 5 bits significant).
    pub flags: u8,
    /// Session identifier; `0` before a session is established.
    pub session_id: u16,
    /// Packet id being acknowledged; meaningful only when `ACK` is set.
    pub acked_packet_id: u16,
    /// This packet's own id; `0` is reserved for "no id" (e.g. bare INIT).
    pub packet_id: u16,
    /// Raw payload bytes (opaque for INIT packets, frame-encoded for COMMAND).
    pub payload: Bytes,
}

/// Errors from envelope encode/decode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer than `ENVELOPE_HEADER_LEN` bytes remain.
    #[error("packet truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required for a full header.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// The encoded length claims more bytes than are available.
    #[error("packet length {length} exceeds the {have} available bytes")]
    LengthExceedsBuffer {
        /// The offending length field.
        length: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// Encoding would need a length field wider than 11 bits.
    #[error("encoded packet length {length} exceeds the 11-bit length field ({MAX_ENVELOPE_LEN})")]
    TooLarge {
        /// The length that would have been encoded.
        length: usize,
    },
    /// The COMMAND payload did not decode into a clean run of frames.
    #[error("packet payload is not a well-formed run of command frames: {0}")]
    MalformedFrames(#[from] FrameError),
}

impl Envelope {
    /// `true` iff the `COMMAND` flag is set.
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.flags & flags::COMMAND != 0
    }

    /// `true` iff the `INIT` flag is set.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.flags & flags::INIT != 0
    }

    /// `true` iff the `ACK` flag is set.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    /// `true` iff the `RETRANSMIT` flag is set.
    #[must_use]
    pub fn is_retransmit(&self) -> bool {
        self.flags & flags::RETRANSMIT != 0
    }

    /// Total encoded size, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_HEADER_LEN + self.payload.len()
    }

    /// Encode this envelope to its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let length = self.encoded_len();
        if length > MAX_ENVELOPE_LEN {
            return Err(PacketError::TooLarge { length });
        }
        let mut out = Vec::with_capacity(length);
        let flags_and_length = (u16::from(self.flags & flags::MASK) << 11) | (length as u16 & 0x07FF);
        out.extend_from_slice(&flags_and_length.to_be_bytes());
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&self.acked_packet_id.to_be_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode an envelope from `buf`. Trailing bytes beyond the declared
    /// length are ignored (a datagram is exactly one envelope).
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ENVELOPE_HEADER_LEN {
            return Err(PacketError::Truncated { need: ENVELOPE_HEADER_LEN, have: buf.len() });
        }
        let flags_and_length = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = ((flags_and_length >> 11) & u16::from(flags::MASK)) as u8;
        let length = usize::from(flags_and_length & 0x07FF);
        if length < ENVELOPE_HEADER_LEN || length > buf.len() {
            return Err(PacketError::LengthExceedsBuffer { length, have: buf.len() });
        }
        let session_id = u16::from_be_bytes([buf[2], buf[3]]);
        let acked_packet_id = u16::from_be_bytes([buf[4], buf[5]]);
        let packet_id = u16::from_be_bytes([buf[10], buf[11]]);
        let payload = Bytes::copy_from_slice(&buf[ENVELOPE_HEADER_LEN..length]);
        Ok(Self { flags, session_id, acked_packet_id, packet_id, payload })
    }

    /// Decode the payload as a run of command frames.
    ///
    /// Only meaningful when [`Self::is_command`] is set and [`Self::is_init`]
    /// is not — an INIT payload is always opaque.
    pub fn frames(&self) -> Result<Vec<Frame>, PacketError> {
        Ok(Frame::decode_all(&self.payload)?)
    }
}

/// Wrap-aware comparison of 16-bit packet ids: is `id` covered by an ACK up
/// to and including `acked`?
///
/// `id == 0` never matches (a `0` packet id entry is never tracked as
/// in-flight). Treats the id space as a monotonic counter that wraps past
/// `0xFFFF`, using the standard half-window sequence comparison.
#[must_use]
pub fn is_acked(id: u16, acked: u16) -> bool {
    if id == 0 {
        return false;
    }
    let diff = acked.wrapping_sub(id);
    diff < 0x8000
}
