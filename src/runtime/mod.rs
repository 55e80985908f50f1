//! Readiness-driven runtime serving the random-number protocol.
//!
//! - `io`: non-blocking read/write helpers
//! - `buffer`: bounds-checked buffers with resumable cursors
//! - `connection`: connection slots and the fixed-capacity slot pool
//! - `protocol`: the per-connection state machine
//! - `event_loop`: the mio poll loop, dispatch and accept
//! - `listener`: Unix socket setup

mod buffer;
mod connection;
mod event_loop;
mod io;
mod listener;
mod protocol;

pub(crate) use buffer::BoundsError;
pub(crate) use event_loop::EventLoop;

use crate::config::Config;
use crate::entropy::DeviceSource;
use crate::error::ServerError;
use tracing::info;

/// Open the entropy device, bind the socket and serve until a fatal error.
pub fn run(config: Config) -> Result<(), ServerError> {
    let entropy = DeviceSource::open(&config.device)?;
    info!(device = %entropy.path().display(), "Using entropy device");

    // Removes the socket path when dropped on the way out
    let (listener, _socket_file) = listener::bind(&config.socket)?;
    info!(socket = %config.socket.display(), "Listening");

    let mut event_loop = EventLoop::new(listener, entropy, &config)
        .map_err(|e| ServerError::socket("register", &config.socket, e))?;
    event_loop.run()
}
