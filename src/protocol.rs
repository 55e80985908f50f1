//! Wire protocol for the random-number socket.
//!
//! Requests are a single command byte, optionally followed by fixed-size
//! parameter bytes. Multi-byte integers are little-endian. Responses carry
//! no transport-level framing beyond what each command defines:
//!
//! ```text
//! 0x00                 -> u32 LE entropy estimate in bits (4 bytes)
//! 0x01 N               -> N, then N random bytes      (nothing if N = 0)
//! 0x02 N               -> N random bytes              (nothing if N = 0)
//! 0x03 S0 S1 S2 S3 ... -> payload length is S3; S0..S2 ignored; payload is discarded
//! 0x04                 -> 0x04 '1' '2' '3' 0x00
//! ```
//!
//! Unknown command bytes are ignored.

/// Size of the per-connection command buffer.
pub const CMD_BUFFER_SIZE: usize = 8;

/// Size of the per-connection data buffer: a length byte plus 256 data bytes.
pub const DATA_BUFFER_SIZE: usize = 257;

/// Bits of entropy reported by the pool-size query. Static, not measured.
pub const ENTROPY_POOL_BITS: u32 = 4096 * 8;

/// Reply to the process-id query. Static, not the real pid.
pub const PID_RESPONSE: [u8; 5] = [4, b'1', b'2', b'3', 0];

/// A decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `0x00`: how many bits of entropy are available.
    EntropyCount,
    /// `0x01`: read random bytes, reply prefixed with its length.
    ReadFramed,
    /// `0x02`: read random bytes, raw reply.
    ReadRaw,
    /// `0x03`: inject entropy.
    WriteEntropy,
    /// `0x04`: daemon process id.
    Pid,
}

impl Command {
    /// Decode a command byte. `None` for bytes outside the command set.
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Command::EntropyCount),
            0x01 => Some(Command::ReadFramed),
            0x02 => Some(Command::ReadRaw),
            0x03 => Some(Command::WriteEntropy),
            0x04 => Some(Command::Pid),
            _ => None,
        }
    }

    /// Number of parameter bytes that follow the command byte.
    pub fn param_len(self) -> usize {
        match self {
            Command::EntropyCount | Command::Pid => 0,
            Command::ReadFramed | Command::ReadRaw => 1,
            Command::WriteEntropy => 4,
        }
    }
}

/// Response to [`Command::EntropyCount`].
pub fn entropy_count_response() -> [u8; 4] {
    ENTROPY_POOL_BITS.to_le_bytes()
}

/// Payload length announced by a [`Command::WriteEntropy`] parameter block.
///
/// Only the last of the four bytes carries the length.
pub fn injection_len(params: [u8; 4]) -> u8 {
    params[3]
}

/// Total response length for a random-bytes request of `n` bytes.
pub fn random_response_len(framed: bool, n: u8) -> usize {
    usize::from(n) + usize::from(framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_commands() {
        assert_eq!(Command::decode(0x00), Some(Command::EntropyCount));
        assert_eq!(Command::decode(0x01), Some(Command::ReadFramed));
        assert_eq!(Command::decode(0x02), Some(Command::ReadRaw));
        assert_eq!(Command::decode(0x03), Some(Command::WriteEntropy));
        assert_eq!(Command::decode(0x04), Some(Command::Pid));
    }

    #[test]
    fn test_decode_unknown_commands() {
        for byte in 0x05..=0xff {
            assert_eq!(Command::decode(byte), None);
        }
    }

    #[test]
    fn test_entropy_count_layout() {
        assert_eq!(entropy_count_response(), [0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_params_fit_command_buffer() {
        for byte in 0x00..=0x04 {
            let cmd = Command::decode(byte).unwrap();
            assert!(cmd.param_len() <= CMD_BUFFER_SIZE);
        }
    }

    #[test]
    fn test_largest_response_fits_data_buffer() {
        assert_eq!(random_response_len(true, u8::MAX), DATA_BUFFER_SIZE - 1);
        assert_eq!(random_response_len(false, 5), 5);
        assert!(PID_RESPONSE.len() <= DATA_BUFFER_SIZE);
    }

    #[test]
    fn test_injection_len_from_last_byte() {
        assert_eq!(injection_len([0x00, 0x00, 0x00, 0x02]), 2);
        assert_eq!(injection_len([0x10, 0x20, 0x30, 0x00]), 0);
        assert_eq!(injection_len([0xff, 0xff, 0xff, 0xff]), 255);
    }
}
