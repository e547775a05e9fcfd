//! Command frame codec (C1).
//!
//! Wire layout: `length:u16 (BE) | reserved:u16 (zero) | code:[u8; 4] | payload`.
//! `length` counts the whole frame, header included.

use bytes::Bytes;
use thiserror::Error;

/// Size of the frame header: length + reserved + code.
pub const FRAME_HEADER_LEN: usize = 8;

/// A decoded or to-be-encoded command frame.
///
/// The payload of an unrecognized `code` is preserved verbatim; this type
/// never interprets it — that's the command registry's job (C4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 4-ASCII command code, e.g. `*b"DCut"`.
    pub code: [u8; 4],
    /// Frame payload, excluding the 8-byte header.
    pub payload: Bytes,
}

/// Errors from frame encode/decode.
///
/// Both variants correspond to the `MALFORMED_FRAME` disposition: the
/// containing packet is dropped, no ACK is sent, the session is untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than `FRAME_HEADER_LEN` bytes remain.
    #[error("frame header truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required for a full header.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// The encoded length field is smaller than the header itself.
    #[error("frame length {length} is shorter than the {FRAME_HEADER_LEN}-byte header")]
    LengthTooShort {
        /// The offending length field.
        length: usize,
    },
    /// The encoded length claims more bytes than are available.
    #[error("frame length {length} exceeds the {remaining} remaining bytes")]
    LengthExceedsRemaining {
        /// The offending length field.
        length: usize,
        /// Bytes actually remaining in the buffer.
        remaining: usize,
    },
}

impl Frame {
    /// Construct a frame from a code and payload.
    pub fn new(code: [u8; 4], payload: impl Into<Bytes>) -> Self {
        Self { code, payload: payload.into() }
    }

    /// Total encoded size, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Append the wire encoding of this frame to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let length = self.encoded_len();
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.payload);
    }

    /// Decode a single frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed, so callers can
    /// advance past it to decode the next frame in a concatenated run.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated { need: FRAME_HEADER_LEN, have: buf.len() });
        }
        let length = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if length < FRAME_HEADER_LEN {
            return Err(FrameError::LengthTooShort { length });
        }
        if length > buf.len() {
            return Err(FrameError::LengthExceedsRemaining { length, remaining: buf.len() });
        }
        let code = [buf[4], buf[5], buf[6], buf[7]];
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..length]);
        Ok((Self { code, payload }, length))
    }

    /// Decode a run of frames that must exactly consume `buf`.
    ///
    /// Used when a packet's `COMMAND` flag is set: the payload is a
    /// concatenation of frames with no trailing bytes.
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Self>, FrameError> {
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let (frame, consumed) = Self::decode(&buf[offset..])?;
            offset += consumed;
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Encode a run of frames back-to-back.
    pub fn encode_all(frames: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames.iter().map(Self::encoded_len).sum());
        for frame in frames {
            frame.encode(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_empty_payload() {
        let frame = Frame::new(*b"InCm", Bytes::from_static(&[1, 0, 0, 0]));
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        let (decoded, consumed) = Frame::decode(&buf).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn decode_all_concatenated_frames() {
        let frames = vec![
            Frame::new(*b"_ver", Bytes::from_static(&[0, 2, 0, 30])),
            Frame::new(*b"InCm", Bytes::from_static(&[1, 0, 0, 0])),
        ];
        let buf = Frame::encode_all(&frames);
        let decoded = Frame::decode_all(&buf).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let err = Frame::decode(&[0, 1]).unwrap_err();
        assert_eq!(err, FrameError::Truncated { need: FRAME_HEADER_LEN, have: 2 });
    }

    #[test]
    fn decode_rejects_length_below_header() {
        let mut buf = vec![0u8; 8];
        buf[0..2].copy_from_slice(&4u16.to_be_bytes());
        let err = Frame::decode(&buf).unwrap_err();
        assert_eq!(err, FrameError::LengthTooShort { length: 4 });
    }

    #[test]
    fn decode_rejects_length_past_buffer() {
        let mut buf = vec![0u8; 8];
        buf[0..2].copy_from_slice(&20u16.to_be_bytes());
        let err = Frame::decode(&buf).unwrap_err();
        assert_eq!(err, FrameError::LengthExceedsRemaining { length: 20, remaining: 8 });
    }
}
