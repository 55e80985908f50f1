//! Per-connection protocol state machine.
//!
//! The event loop calls [`on_readable`] or [`on_writable`] at most once per
//! slot per iteration. Each call performs a single non-blocking I/O attempt
//! and advances the slot's state as far as the bytes moved allow. Partial
//! commands and responses stay in the slot's buffers until the next call.

use crate::entropy::EntropySource;
use crate::error::ServerError;
use crate::protocol::{
    entropy_count_response, injection_len, random_response_len, Command, DATA_BUFFER_SIZE,
    PID_RESPONSE,
};
use crate::runtime::connection::{Slot, SlotState};
use crate::runtime::io::{bounded_read, bounded_write, IoOutcome};
use std::io::{self, Read, Write};
use tracing::{debug, warn};

/// Consecutive definite write errors tolerated before the connection is closed.
pub const MAX_WRITE_ERRORS: u32 = 3;

/// Result of advancing a slot by one I/O step.
#[derive(Debug)]
pub enum Step {
    /// The step did something; the socket may still be ready.
    Progress,
    /// The socket would block; wait for the next readiness event.
    Blocked,
    /// The connection is finished and must be closed.
    Close(io::Error),
}

/// Advance a slot that is waiting for client bytes.
///
/// Errors are process-fatal: an entropy source failure or a buffer-bounds
/// violation. Client-side faults come back as [`Step::Close`].
pub fn on_readable<S, E>(slot: &mut Slot<S>, entropy: &mut E) -> Result<Step, ServerError>
where
    S: Read,
    E: EntropySource + ?Sized,
{
    match slot.state {
        SlotState::SendData => return Ok(Step::Progress),
        SlotState::DiscardPayload { remaining } => return discard_payload(slot, remaining),
        _ => {}
    }

    if !slot.cmd.is_complete() {
        let n = match read_step(&mut slot.stream, slot.cmd.unfilled_mut()?) {
            Ok(n) => n,
            Err(step) => return Ok(step),
        };
        slot.cmd.advance(n)?;
        slot.touch();

        if !slot.cmd.is_complete() {
            return Ok(Step::Progress);
        }
    }

    complete_command(slot, entropy)?;
    Ok(Step::Progress)
}

/// Advance a slot that has response bytes to send.
pub fn on_writable<S: Write>(slot: &mut Slot<S>) -> Result<Step, ServerError> {
    if slot.state != SlotState::SendData {
        return Ok(Step::Progress);
    }
    if slot.data.is_complete() {
        slot.enter_idle()?;
        return Ok(Step::Progress);
    }

    match bounded_write(&mut slot.stream, slot.data.pending()?) {
        Ok(IoOutcome::Transferred(0)) => Ok(write_failed(
            slot,
            io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
        )),
        Ok(IoOutcome::Transferred(n)) => {
            slot.data.advance(n)?;
            slot.write_errors = 0;
            slot.touch();
            if slot.data.is_complete() {
                slot.enter_idle()?;
            }
            Ok(Step::Progress)
        }
        Ok(IoOutcome::WouldBlock) => Ok(Step::Blocked),
        Err(e) => Ok(write_failed(slot, e)),
    }
}

/// One read attempt. `Err` carries the step to report instead of a byte count.
fn read_step<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<usize, Step> {
    match bounded_read(stream, buf) {
        Ok(IoOutcome::Transferred(0)) => Err(Step::Close(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))),
        Ok(IoOutcome::Transferred(n)) => Ok(n),
        Ok(IoOutcome::WouldBlock) => Err(Step::Blocked),
        Err(e) => Err(Step::Close(e)),
    }
}

fn write_failed<S>(slot: &mut Slot<S>, error: io::Error) -> Step {
    slot.write_errors += 1;
    if slot.write_errors >= MAX_WRITE_ERRORS {
        return Step::Close(error);
    }
    warn!(attempt = slot.write_errors, error = %error, "Write failed, will retry");
    Step::Progress
}

/// The command buffer holds everything the current state asked for.
fn complete_command<S, E>(slot: &mut Slot<S>, entropy: &mut E) -> Result<(), ServerError>
where
    E: EntropySource + ?Sized,
{
    match slot.state {
        SlotState::Idle => {
            let [byte] = slot.cmd.filled_array::<1>()?;
            match Command::decode(byte) {
                Some(Command::EntropyCount) => {
                    slot.data.load(&entropy_count_response())?;
                    slot.state = SlotState::SendData;
                }
                Some(Command::Pid) => {
                    slot.data.load(&PID_RESPONSE)?;
                    slot.state = SlotState::SendData;
                }
                Some(cmd @ Command::ReadFramed) => {
                    slot.expect_params(SlotState::AwaitReadParam, cmd.param_len())?
                }
                Some(cmd @ Command::ReadRaw) => {
                    slot.expect_params(SlotState::AwaitReadBlockingParam, cmd.param_len())?
                }
                Some(cmd @ Command::WriteEntropy) => {
                    slot.expect_params(SlotState::AwaitWriteParam, cmd.param_len())?
                }
                None => {
                    debug!(command = byte, "Ignoring unknown command");
                    slot.enter_idle()?;
                }
            }
        }
        SlotState::AwaitReadParam => stage_random(slot, entropy, true)?,
        SlotState::AwaitReadBlockingParam => stage_random(slot, entropy, false)?,
        SlotState::AwaitWriteParam => {
            let len = injection_len(slot.cmd.filled_array::<4>()?);
            if len == 0 {
                slot.enter_idle()?;
            } else {
                debug!(bytes = len, "Discarding entropy injection payload");
                slot.state = SlotState::DiscardPayload { remaining: len };
            }
        }
        SlotState::SendData | SlotState::DiscardPayload { .. } => {}
    }
    Ok(())
}

/// Pull the requested random bytes from the source into the data buffer.
fn stage_random<S, E>(slot: &mut Slot<S>, entropy: &mut E, framed: bool) -> Result<(), ServerError>
where
    E: EntropySource + ?Sized,
{
    let [n] = slot.cmd.filled_array::<1>()?;
    if n == 0 {
        // Nothing to send, not even a length byte
        slot.enter_idle()?;
        return Ok(());
    }

    debug!(bytes = n, framed, "Requested random bytes");
    let prefix = usize::from(framed);
    let delivered = slot
        .data
        .stage_with(random_response_len(framed, n), |window| {
            if framed {
                window[0] = n;
            }
            entropy.fill(&mut window[prefix..])
        })??;

    let requested = usize::from(n);
    if delivered != requested {
        return Err(ServerError::EntropyMismatch {
            requested,
            delivered,
        });
    }
    slot.state = SlotState::SendData;
    Ok(())
}

/// Consume up to one buffer's worth of an injection payload.
fn discard_payload<S: Read>(slot: &mut Slot<S>, remaining: u8) -> Result<Step, ServerError> {
    slot.data.arm(usize::from(remaining).min(DATA_BUFFER_SIZE))?;

    let n = match read_step(&mut slot.stream, slot.data.unfilled_mut()?) {
        Ok(n) => n,
        Err(step) => return Ok(step),
    };
    slot.data.advance(n)?;
    slot.touch();

    // n <= remaining, so this never wraps
    let remaining = remaining - n as u8;
    if remaining == 0 {
        slot.enter_idle()?;
    } else {
        slot.state = SlotState::DiscardPayload { remaining };
    }
    Ok(Step::Progress)
}
