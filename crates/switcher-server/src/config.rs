//! CLI surface (C11).
//!
//! Flag names and defaults (`--address`, `--port`, `--debug`,
//! `--descriptor`) mirror the server's external-interface contract.

use clap::Parser;

/// Switcher control-plane server.
#[derive(Parser, Debug)]
#[command(name = "switcher-server")]
#[command(about = "Video switcher control-plane server")]
#[command(version)]
pub struct Args {
    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub address: String,

    /// UDP port to bind to.
    #[arg(long, default_value_t = 9910)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    pub debug: String,

    /// Path to an XML switcher descriptor overriding the compiled-in default.
    #[arg(long)]
    pub descriptor: Option<String>,
}
