//! Connection slots and the fixed-capacity slot pool.
//!
//! Each connected client owns one slot: its stream, its protocol state and
//! the two buffers that carry partial requests and responses across
//! readiness ticks. A slot id is stable for the life of the connection.
//! A vacant id is a slot in the "not connected" state.

use crate::protocol::{CMD_BUFFER_SIZE, DATA_BUFFER_SIZE};
use crate::runtime::buffer::{BoundsError, FixedBuffer};
use slab::Slab;
use std::time::Instant;

/// Protocol state of a connected slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for a command byte.
    Idle,
    /// Draining the data buffer to the client.
    SendData,
    /// Collecting the length byte of a framed random read.
    AwaitReadParam,
    /// Collecting the length byte of a raw random read.
    AwaitReadBlockingParam,
    /// Collecting the 4-byte payload length of an entropy injection.
    AwaitWriteParam,
    /// Reading and dropping an injection payload.
    DiscardPayload {
        /// Payload bytes still to be consumed.
        remaining: u8,
    },
}

impl SlotState {
    /// Whether the slot is waiting for bytes from the client.
    pub fn wants_read(self) -> bool {
        !self.wants_write()
    }

    /// Whether the slot has bytes to send to the client.
    pub fn wants_write(self) -> bool {
        matches!(self, SlotState::SendData)
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Slot<S> {
    pub stream: S,
    pub state: SlotState,
    /// Command byte and its parameters.
    pub cmd: FixedBuffer<CMD_BUFFER_SIZE>,
    /// Response bytes, or scratch space for a discarded payload.
    pub data: FixedBuffer<DATA_BUFFER_SIZE>,
    /// Sticky readiness, set by poll events and cleared on would-block.
    pub readable: bool,
    pub writable: bool,
    /// The transport reported an error condition.
    pub broken: bool,
    /// Consecutive failed write attempts.
    pub write_errors: u32,
    /// Last time a request on this slot moved forward.
    pub last_progress: Instant,
}

impl<S> Slot<S> {
    /// Wrap a freshly accepted stream, ready for its first command.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: SlotState::Idle,
            cmd: FixedBuffer::armed::<1>(),
            data: FixedBuffer::new(),
            readable: false,
            writable: false,
            broken: false,
            write_errors: 0,
            last_progress: Instant::now(),
        }
    }

    /// Go back to waiting for the next command byte.
    pub fn enter_idle(&mut self) -> Result<(), BoundsError> {
        self.cmd.arm(1)?;
        self.state = SlotState::Idle;
        Ok(())
    }

    /// Collect `len` parameter bytes, then continue in `state`.
    pub fn expect_params(&mut self, state: SlotState, len: usize) -> Result<(), BoundsError> {
        self.cmd.arm(len)?;
        self.state = state;
        Ok(())
    }

    /// Whether the slot can do work on the next tick without a new event.
    pub fn has_pending_io(&self) -> bool {
        self.broken
            || (self.readable && self.state.wants_read())
            || (self.writable && self.state.wants_write())
    }

    pub fn touch(&mut self) {
        self.last_progress = Instant::now();
    }
}

/// Fixed-capacity pool of connection slots.
///
/// Backed by a slab, so claiming and releasing a slot never scans the pool.
pub struct SlotPool<S> {
    slots: Slab<Slot<S>>,
    capacity: usize,
}

impl<S> SlotPool<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Claim a free slot for `stream`.
    ///
    /// Returns the stream back if the pool is full.
    pub fn insert(&mut self, stream: S) -> Result<usize, S> {
        if self.is_full() {
            return Err(stream);
        }
        Ok(self.slots.insert(Slot::new(stream)))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Slot<S>> {
        self.slots.get_mut(id)
    }

    /// Release a slot, handing back its connection.
    pub fn remove(&mut self, id: usize) -> Option<Slot<S>> {
        self.slots.try_remove(id)
    }

    /// State of slot `id`; `None` means not connected.
    #[cfg(test)]
    pub fn state(&self, id: usize) -> Option<SlotState> {
        self.slots.get(id).map(|slot| slot.state)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupied slots in id order. Every id is below the capacity.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot<S>)> {
        self.slots.iter()
    }
}
