//! Process-fatal error taxonomy.
//!
//! Anything that reaches `main` as a `ServerError` terminates the daemon with
//! a failure status. Faults local to one client connection are handled inside
//! the event loop by closing that connection and never become a `ServerError`.

use crate::entropy::EntropyError;
use crate::runtime::BoundsError;
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Something already lives at the socket path.
    #[error("the socket already exists: '{}'", .0.display())]
    SocketExists(PathBuf),

    /// Socket creation, bind, chmod, listen or flag setup failed.
    #[error("failed to {op} the socket '{}': {source}", .path.display())]
    Socket {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),

    #[error(transparent)]
    Entropy(#[from] EntropyError),

    /// The entropy source delivered a different number of bytes than asked.
    #[error("requested {requested} random bytes, but the entropy source delivered {delivered}")]
    EntropyMismatch { requested: usize, delivered: usize },

    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

impl ServerError {
    pub(crate) fn socket(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ServerError::Socket {
            op,
            path: path.into(),
            source,
        }
    }
}
