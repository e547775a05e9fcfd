//! Client manager (C7), server loop (C8), initial-state dump source (C9),
//! and CLI surface (C11) for the switcher control-plane server.
//!
//! Thin production "glue" over [`switcher_core`]: the manager and server
//! loop drive [`switcher_core::session::Session`]'s actions with a real UDP
//! socket and system clock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod initial_state;
pub mod manager;
pub mod server;
pub mod system_env;

pub use config::Args;
pub use error::ServerError;
pub use manager::ClientManager;
pub use server::Server;
pub use system_env::SystemEnv;
