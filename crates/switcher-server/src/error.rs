//! Top-level server errors (C8, C10).
//!
//! One `thiserror` enum per binary-level failure mode, with a `From` chain
//! from lower layers so a descriptor or transport error propagates without
//! manual wrapping.

use thiserror::Error;

/// Errors that can end the server process or one iteration of its loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or operating the UDP socket failed in a way a rebind can't
    /// fix (distinct from the transient `SOCKET_RESET` disposition, which
    /// the server loop handles internally by rebinding and continuing).
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// The descriptor file at startup was missing or malformed. Fatal:
    /// there is no runtime fallback once the process has started.
    #[error("failed to load descriptor: {0}")]
    Descriptor(#[from] switcher_state::DescriptorError),

    /// Reading the descriptor file from disk failed.
    #[error("failed to read descriptor file {path}: {source}")]
    DescriptorIo {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
