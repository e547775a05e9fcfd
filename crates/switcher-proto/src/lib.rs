//! Wire-format codecs for the switcher control protocol: command frames
//! (C1) and the datagram envelope that carries them (C2).
//!
//! This crate is pure codec logic — no sockets, no session state, no clock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod packet;

pub use frame::{Frame, FrameError, FRAME_HEADER_LEN};
pub use packet::{flags as packet_flags, is_acked, Envelope, PacketError, ENVELOPE_HEADER_LEN, MAX_ENVELOPE_LEN};
