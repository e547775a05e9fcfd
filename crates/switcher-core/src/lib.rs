//! Command registry (C4), response planner (C5), and per-client session
//! engine (C6) for the switcher control protocol.
//!
//! Pure logic: no sockets, no real clock. [`env::Environment`] abstracts
//! time so the session engine and planner can be driven deterministically
//! in tests and by a real clock in production.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod env;
pub mod error;
pub mod planner;
pub mod session;

pub use command::InboundCommand;
pub use env::{Environment, WallClock};
pub use error::{CommandError, SessionError};
pub use planner::{plan, Carrier};
pub use session::{Session, SessionAction, SessionState};
