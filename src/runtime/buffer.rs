//! Fixed-capacity connection buffers with resumable fill/drain cursors.
//!
//! A buffer is armed with the number of bytes `expected` for the current
//! transfer. Reads fill (or writes drain) the window `[transferred, expected)`
//! and advance `transferred` by whatever the socket moved, so a transfer can
//! stop at any byte and pick up on the next readiness tick.
//!
//! `transferred <= expected <= N` holds at all times. Any operation that would
//! break it fails with [`BoundsError`], which the event loop treats as fatal.

use std::fmt;

/// A cursor or length escaped the buffer it indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "buffer index exceeds the buffer size (transferred {transferred}, expected {expected}, capacity {capacity})"
)]
pub struct BoundsError {
    pub capacity: usize,
    pub expected: usize,
    pub transferred: usize,
}

pub struct FixedBuffer<const N: usize> {
    data: [u8; N],
    expected: usize,
    transferred: usize,
}

impl<const N: usize> FixedBuffer<N> {
    pub fn new() -> Self {
        Self {
            data: [0u8; N],
            expected: 0,
            transferred: 0,
        }
    }

    /// A buffer already armed for an `E`-byte transfer. `E <= N` is checked
    /// at compile time.
    pub fn armed<const E: usize>() -> Self {
        const { assert!(E <= N, "transfer larger than the buffer") };
        Self {
            data: [0u8; N],
            expected: E,
            transferred: 0,
        }
    }

    /// Start a new transfer of `expected` bytes.
    pub fn arm(&mut self, expected: usize) -> Result<(), BoundsError> {
        self.check(expected, 0)?;
        self.expected = expected;
        self.transferred = 0;
        Ok(())
    }

    /// Copy `bytes` in and arm the buffer to send them.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), BoundsError> {
        self.arm(bytes.len())?;
        self.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Arm for `len` bytes and hand the whole window to `f` to populate.
    ///
    /// The window is left unarmed if `f` fails.
    pub fn stage_with<T, E>(
        &mut self,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<T, E>,
    ) -> Result<Result<T, E>, BoundsError> {
        self.check(len, 0)?;
        self.expected = 0;
        self.transferred = 0;
        let result = f(&mut self.data[..len]);
        if result.is_ok() {
            self.expected = len;
        }
        Ok(result)
    }

    /// The not yet transferred part of the current window, for reading into.
    pub fn unfilled_mut(&mut self) -> Result<&mut [u8], BoundsError> {
        self.check(self.expected, self.transferred)?;
        Ok(&mut self.data[self.transferred..self.expected])
    }

    /// The not yet transferred part of the current window, for writing out.
    pub fn pending(&self) -> Result<&[u8], BoundsError> {
        self.check(self.expected, self.transferred)?;
        Ok(&self.data[self.transferred..self.expected])
    }

    /// Record that `n` more bytes moved.
    pub fn advance(&mut self, n: usize) -> Result<(), BoundsError> {
        let transferred = self.transferred.saturating_add(n);
        self.check(self.expected, transferred)?;
        self.transferred = transferred;
        Ok(())
    }

    /// Bytes moved so far in the current transfer.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.transferred.min(self.expected)]
    }

    /// The first `M` transferred bytes as an array.
    pub fn filled_array<const M: usize>(&self) -> Result<[u8; M], BoundsError> {
        self.filled()
            .get(..M)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(BoundsError {
                capacity: N,
                expected: M,
                transferred: self.transferred,
            })
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.expected
    }

    #[cfg(test)]
    pub fn expected(&self) -> usize {
        self.expected
    }

    #[cfg(test)]
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    fn check(&self, expected: usize, transferred: usize) -> Result<(), BoundsError> {
        if transferred <= expected && expected <= N {
            Ok(())
        } else {
            Err(BoundsError {
                capacity: N,
                expected,
                transferred,
            })
        }
    }
}

impl<const N: usize> Default for FixedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("capacity", &N)
            .field("expected", &self.expected)
            .field("transferred", &self.transferred)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumable_fill() {
        let mut buf = FixedBuffer::<8>::new();
        buf.arm(4).unwrap();

        buf.unfilled_mut().unwrap()[..1].copy_from_slice(&[0xaa]);
        buf.advance(1).unwrap();
        assert!(!buf.is_complete());
        assert_eq!(buf.unfilled_mut().unwrap().len(), 3);

        buf.unfilled_mut().unwrap().copy_from_slice(&[0xbb, 0xcc, 0xdd]);
        buf.advance(3).unwrap();
        assert!(buf.is_complete());
        assert_eq!(buf.filled(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_filled_array_requires_enough_bytes() {
        let mut buf = FixedBuffer::<8>::new();
        buf.arm(4).unwrap();
        buf.unfilled_mut().unwrap()[..2].copy_from_slice(&[1, 2]);
        buf.advance(2).unwrap();

        assert_eq!(buf.filled_array::<1>().unwrap(), [1]);
        assert!(buf.filled_array::<4>().is_err());
    }

    #[test]
    fn test_armed_constructor() {
        let mut buf = FixedBuffer::<8>::armed::<1>();
        assert_eq!(buf.expected(), 1);
        assert_eq!(buf.unfilled_mut().unwrap().len(), 1);
        assert!(!buf.is_complete());
    }

    #[test]
    fn test_partial_drain() {
        let mut buf = FixedBuffer::<257>::new();
        buf.load(b"hello").unwrap();
        assert_eq!(buf.pending().unwrap(), b"hello");

        buf.advance(2).unwrap();
        assert_eq!(buf.pending().unwrap(), b"llo");
        buf.advance(3).unwrap();
        assert!(buf.is_complete());
        assert!(buf.pending().unwrap().is_empty());
    }

    #[test]
    fn test_arm_past_capacity() {
        let mut buf = FixedBuffer::<8>::new();
        let err = buf.arm(9).unwrap_err();
        assert_eq!(err.capacity, 8);
        assert_eq!(err.expected, 9);
        // Rejected arm leaves the previous window intact
        assert_eq!(buf.expected(), 0);
    }

    #[test]
    fn test_load_past_capacity() {
        let mut buf = FixedBuffer::<257>::new();
        assert!(buf.load(&[0u8; 258]).is_err());
        assert!(buf.load(&[0u8; 257]).is_ok());
    }

    #[test]
    fn test_advance_past_expected() {
        let mut buf = FixedBuffer::<8>::new();
        buf.arm(1).unwrap();
        assert!(buf.advance(2).is_err());
        assert_eq!(buf.transferred(), 0);
        assert!(buf.advance(usize::MAX).is_err());
    }

    #[test]
    fn test_bounds_error_message() {
        let err = FixedBuffer::<8>::new().arm(9).unwrap_err();
        assert_eq!(
            err.to_string(),
            "buffer index exceeds the buffer size (transferred 0, expected 9, capacity 8)"
        );
    }

    #[test]
    fn test_stage_with_failure_leaves_nothing_to_send() {
        let mut buf = FixedBuffer::<257>::new();
        buf.load(b"old").unwrap();

        let result = buf
            .stage_with(3, |_| Err::<(), &str>("device gone"))
            .unwrap();
        assert!(result.is_err());
        assert_eq!(buf.expected(), 0);
        assert!(buf.pending().unwrap().is_empty());

        let staged = buf
            .stage_with(3, |window| {
                window.copy_from_slice(b"new");
                Ok::<_, ()>(window.len())
            })
            .unwrap();
        assert_eq!(staged, Ok(3));
        assert_eq!(buf.pending().unwrap(), b"new");
    }
}
