//! Non-blocking read/write helpers.
//!
//! Interrupted calls are retried in place. Would-block is surfaced so the
//! caller can go back to the event loop instead of spinning.

use std::io::{self, Read, Write};

/// Outcome of a single non-blocking I/O attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// The call moved this many bytes. Zero from a read means end of stream.
    Transferred(usize),
    /// Nothing can move until the next readiness notification.
    WouldBlock,
}

/// Read at most `buf.len()` bytes.
pub fn bounded_read<R: Read + ?Sized>(src: &mut R, buf: &mut [u8]) -> io::Result<IoOutcome> {
    loop {
        match src.read(buf) {
            Ok(n) => return Ok(IoOutcome::Transferred(n)),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoOutcome::WouldBlock),
            Err(e) => return Err(e),
        }
    }
}

/// Write at most `buf.len()` bytes.
pub fn bounded_write<W: Write + ?Sized>(dst: &mut W, buf: &[u8]) -> io::Result<IoOutcome> {
    loop {
        match dst.write(buf) {
            Ok(n) => return Ok(IoOutcome::Transferred(n)),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoOutcome::WouldBlock),
            Err(e) => return Err(e),
        }
    }
}
