//! Listening socket setup.

use crate::error::ServerError;
use mio::net::UnixListener;
use socket2::{Domain, SockAddr, Socket, Type};
use std::fs::{self, Permissions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The socket file created by [`bind`]. Removed from the filesystem on drop.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "Removed socket file");
        }
    }
}

/// Bind a world-accessible, non-blocking Unix stream listener at `path`.
///
/// Refuses to start over anything that already exists at `path`.
pub fn bind(path: &Path) -> Result<(UnixListener, SocketFile), ServerError> {
    match fs::symlink_metadata(path) {
        Ok(_) => return Err(ServerError::SocketExists(path.to_path_buf())),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ServerError::socket("stat", path, e)),
    }

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|e| ServerError::socket("create", path, e))?;
    let addr = SockAddr::unix(path).map_err(|e| ServerError::socket("address", path, e))?;
    socket
        .bind(&addr)
        .map_err(|e| ServerError::socket("bind", path, e))?;

    let file = SocketFile {
        path: path.to_path_buf(),
    };

    fs::set_permissions(path, Permissions::from_mode(0o777))
        .map_err(|e| ServerError::socket("chmod", path, e))?;
    socket
        .listen(libc::SOMAXCONN)
        .map_err(|e| ServerError::socket("listen on", path, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::socket("set flags on", path, e))?;

    let listener = std::os::unix::net::UnixListener::from(OwnedFd::from(socket));
    Ok((UnixListener::from_std(listener), file))
}

#[cfg(test)]
pub(crate) fn test_socket_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("quantisd-{}-{}", std::process::id(), name));
    let _ = fs::remove_file(&path);
    path
}
