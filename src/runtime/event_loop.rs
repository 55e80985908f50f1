//! mio event loop.
//!
//! Single-threaded and readiness-based: poll tells us which sockets are
//! ready, then each connected slot gets at most one read step and one write
//! step per iteration, in slot order. Entropy reads happen inline, so a slow
//! device stalls the whole loop.
//!
//! mio notifications are edge-triggered. Every slot (and the listener) keeps
//! a sticky readiness flag that events set and only a would-block clears,
//! and the loop polls without waiting while any flag still has work behind
//! it. That keeps the one-step-per-iteration rule without losing wakeups.

use crate::config::Config;
use crate::entropy::EntropySource;
use crate::error::ServerError;
use crate::runtime::connection::{Slot, SlotPool, SlotState};
use crate::runtime::protocol::{on_readable, on_writable, Step};
use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, trace_span, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

pub struct EventLoop<E> {
    poll: Poll,
    events: Events,
    listener: UnixListener,
    /// Connections may be waiting in the backlog.
    listener_ready: bool,
    slots: SlotPool<UnixStream>,
    entropy: E,
    poll_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl<E: EntropySource> EventLoop<E> {
    pub fn new(mut listener: UnixListener, entropy: E, config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_connections + 1),
            listener,
            listener_ready: false,
            slots: SlotPool::new(config.max_connections),
            entropy,
            poll_timeout: config.poll_timeout,
            idle_timeout: config.idle_timeout,
        })
    }

    /// Serve clients until a fatal error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(
            capacity = self.slots.capacity(),
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Event loop started"
        );
        loop {
            self.turn()?;
        }
    }

    /// Run one iteration: wait for readiness, advance every ready slot once,
    /// drop stalled requests, then accept at most one new connection.
    pub fn turn(&mut self) -> Result<(), ServerError> {
        let timeout = if self.has_pending_work() {
            Duration::ZERO
        } else {
            self.poll_timeout
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        if self.events.is_empty() && timeout > Duration::ZERO {
            trace!(active = self.slots.len(), "Readiness wait timed out");
            // Re-probe the backlog in case an earlier accept failure left it untended
            self.listener_ready = true;
        }

        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.listener_ready = true,
                Token(id) => {
                    if let Some(slot) = self.slots.get_mut(id) {
                        slot.readable |= event.is_readable() || event.is_read_closed();
                        slot.writable |= event.is_writable() || event.is_write_closed();
                        slot.broken |= event.is_error();
                    }
                }
            }
        }

        self.dispatch()?;
        self.expire_stalled();
        self.accept_one();
        Ok(())
    }

    /// Number of connected clients.
    pub fn active(&self) -> usize {
        self.slots.len()
    }

    fn has_pending_work(&self) -> bool {
        (self.listener_ready && !self.slots.is_full())
            || self.slots.iter().any(|(_, slot)| slot.has_pending_io())
    }

    fn dispatch(&mut self) -> Result<(), ServerError> {
        for id in 0..self.slots.capacity() {
            let Some(slot) = self.slots.get_mut(id) else {
                continue;
            };
            let _span = trace_span!("slot", id).entered();
            if let Some(reason) = advance(slot, &mut self.entropy)? {
                self.close(id, reason);
            }
        }
        Ok(())
    }

    fn expire_stalled(&mut self) {
        let Some(limit) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let stalled: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.state != SlotState::Idle && now.duration_since(slot.last_progress) >= limit
            })
            .map(|(id, _)| id)
            .collect();

        for id in stalled {
            self.close(
                id,
                io::Error::new(io::ErrorKind::TimedOut, "request made no progress"),
            );
        }
    }

    fn accept_one(&mut self) {
        if !self.listener_ready || self.slots.is_full() {
            return;
        }

        match self.listener.accept() {
            Ok((stream, _addr)) => self.admit(stream),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => self.listener_ready = false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Accept failed");
                self.listener_ready = false;
            }
        }
    }

    fn admit(&mut self, stream: UnixStream) {
        let Ok(id) = self.slots.insert(stream) else {
            return;
        };
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };

        let registered = self.poll.registry().register(
            &mut slot.stream,
            Token(id),
            Interest::READABLE | Interest::WRITABLE,
        );
        if let Err(e) = registered {
            warn!(slot = id, error = %e, "Failed to register connection");
            self.slots.remove(id);
            return;
        }

        debug!(slot = id, active = self.active(), "Accepted connection");
    }

    fn close(&mut self, id: usize, reason: io::Error) {
        let Some(mut slot) = self.slots.remove(id) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut slot.stream);

        if reason.kind() == io::ErrorKind::UnexpectedEof {
            debug!(slot = id, "Client disconnected");
        } else {
            warn!(slot = id, state = ?slot.state, error = %reason, "Closing connection");
        }
    }
}

/// Give a slot its read step and its write step, as its readiness allows.
///
/// Returns why the connection must be closed, if it must.
fn advance<S, E>(slot: &mut Slot<S>, entropy: &mut E) -> Result<Option<io::Error>, ServerError>
where
    S: Read + Write,
    E: EntropySource + ?Sized,
{
    if slot.broken {
        return Ok(Some(io::Error::new(
            io::ErrorKind::Other,
            "transport reported an error condition",
        )));
    }

    if slot.readable && slot.state.wants_read() {
        match on_readable(slot, entropy)? {
            Step::Progress => {}
            Step::Blocked => slot.readable = false,
            Step::Close(e) => return Ok(Some(e)),
        }
    }

    if slot.writable && slot.state.wants_write() {
        match on_writable(slot)? {
            Step::Progress => {}
            Step::Blocked => slot.writable = false,
            Step::Close(e) => return Ok(Some(e)),
        }
    }

    Ok(None)
}
