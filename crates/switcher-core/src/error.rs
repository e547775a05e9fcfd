//! Typed errors for command parsing and session handling.
//!
//! The `BAD_PAYLOAD` disposition is non-fatal to the session, so callers
//! match on the variant rather than treating every `CommandError` as
//! connection-ending.

use thiserror::Error;

/// Errors parsing an inbound command frame's payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A recognized code's payload had the wrong length.
    #[error("payload for {code} expected {expected} bytes, got {actual}")]
    BadPayload {
        /// The 4-ASCII code whose payload failed to parse.
        code: &'static str,
        /// Expected payload length in bytes.
        expected: usize,
        /// Actual payload length in bytes.
        actual: usize,
    },
}

impl CommandError {
    /// `BAD_PAYLOAD` is always non-fatal: drop the one frame, keep parsing
    /// the rest of the packet, still ACK the packet id.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BadPayload { .. })
    }
}

/// Errors from per-client session handling.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// An inbound envelope's session id didn't match this session's
    /// assigned id. Indicates a client manager routing bug, not a
    /// malformed-input condition from the wire.
    #[error("envelope session id {actual:#06x} does not match this session's id {expected:#06x}")]
    SessionMismatch {
        /// This session's assigned id.
        expected: u16,
        /// The id carried by the misrouted envelope.
        actual: u16,
    },
}
