//! pinboard: a minimal message board server
//!
//! Clients connect over TCP and send newline-terminated commands:
//! - `POST <message>`: add a message to the board
//! - `GET`: list all messages with their sender and reaction
//! - `HAPPY <id>` / `SAD <id>`: react to a message
//!
//! Features:
//! - Single-threaded, edge-triggered event loop (epoll/kqueue via mio)
//! - Buffered reads and writes with write-readiness backpressure
//! - Configuration via CLI arguments or TOML file

mod address;
mod config;
mod error;
mod protocol;
mod runtime;
mod storage;

use config::Config;
use runtime::Reactor;
use storage::MessageStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        "Starting pinboard server"
    );

    let store = MessageStore::new();
    let mut reactor = match Reactor::build(&config, store) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!(error = %e, "FATAL: Failed to initialize server");
            return Err(e.into());
        }
    };

    let addr = reactor.local_addr()?;
    info!(addr = %addr, "Listening for connections");

    let result = reactor.run();
    info!("Application terminating");
    result.map_err(Into::into)
}
