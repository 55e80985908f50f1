//! quantisd: serves a hardware random-number generator to local clients.
//!
//! Clients connect to a Unix domain socket and speak a small binary
//! protocol: query the entropy estimate, read blocks of random bytes
//! (framed or raw), inject entropy, or query the daemon's id.
//!
//! Features:
//! - Single-threaded mio event loop with a fixed-size connection pool
//! - Resumable per-connection state machine for partial reads and writes
//! - Stalled-request timeout
//! - Configuration via CLI arguments or TOML file

mod config;
mod entropy;
mod error;
mod protocol;
mod runtime;

use config::Config;
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
        socket = %config.socket.display(),
        device = %config.device.display(),
        max_connections = config.max_connections,
        "Starting quantisd"
    );

    if let Err(e) = runtime::run(config) {
        error!(error = %e, "Fatal error, shutting down");
        return Err(e.into());
    }
    Ok(())
}
