//! Switcher server binary.
//!
//! # Usage
//!
//! ```bash
//! switcher-server --address 0.0.0.0 --port 9910
//! switcher-server --descriptor my-switcher.xml
//! ```

use clap::Parser;
use switcher_server::{Args, Server};
use switcher_state::StateStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.debug));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("switcher server starting");

    // A bad descriptor is fatal at startup: there is no runtime fallback
    // once the process has started.
    let state = match load_state(args.descriptor.as_deref()) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(%err, "failed to load switcher descriptor, exiting");
            return Err(err.into());
        },
    };

    let server = Server::bind(&args.address, args.port, state).await?;
    tracing::info!(addr = %server.local_addr()?, "listening");
    server.run().await?;

    Ok(())
}

fn load_state(descriptor_path: Option<&str>) -> Result<StateStore, switcher_server::ServerError> {
    let root = match descriptor_path {
        Some(path) => {
            let xml = std::fs::read_to_string(path)
                .map_err(|source| switcher_server::ServerError::DescriptorIo { path: path.to_string(), source })?;
            switcher_state::load_descriptor(&xml)?
        },
        None => switcher_state::load_default(),
    };
    Ok(StateStore::new(root))
}
