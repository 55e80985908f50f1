//! Entropy sources.
//!
//! The daemon asks its source for exactly N bytes at a time and calls it
//! synchronously from the event loop, so a slow device stalls every client
//! for the duration of the read.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EntropyError {
    #[error("no entropy device found at '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {requested} bytes from the entropy device: {source}")]
    Read {
        requested: usize,
        #[source]
        source: io::Error,
    },
}

/// A supplier of random bytes.
pub trait EntropySource {
    /// Fill `buf` with random data and return how many bytes were written.
    ///
    /// Anything other than `buf.len()` is an integration fault; callers treat
    /// it as fatal.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, EntropyError>;
}

/// Hardware RNG exposed as a character device (e.g. `/dev/qrandom0`, `/dev/hwrng`).
#[derive(Debug)]
pub struct DeviceSource {
    path: PathBuf,
    device: File,
}

impl DeviceSource {
    /// Open the device. Fails if the node does not exist or cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EntropyError> {
        let path = path.as_ref().to_path_buf();
        let device = File::open(&path).map_err(|source| EntropyError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, device })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntropySource for DeviceSource {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, EntropyError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.device.read(&mut buf[filled..]) {
                Ok(0) => {
                    debug!(filled, requested = buf.len(), "Entropy device hit end of file");
                    break;
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(EntropyError::Read {
                        requested: buf.len(),
                        source,
                    })
                }
            }
        }
        Ok(filled)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device() {
        let err = DeviceSource::open("/nonexistent/quantis-device").unwrap_err();
        assert!(matches!(err, EntropyError::Open { .. }));
    }

    #[test]
    fn test_device_fills_exactly() {
        let mut source = DeviceSource::open("/dev/urandom").unwrap();
        let mut buf = [0u8; 255];
        assert_eq!(source.fill(&mut buf).unwrap(), 255);
    }

    #[test]
    fn test_device_reports_short_read() {
        // /dev/null is always at end of file
        let mut source = DeviceSource::open("/dev/null").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(source.fill(&mut buf).unwrap(), 0);
    }
}
