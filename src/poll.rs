//! Readiness multiplexing over raw descriptors.
//!
//! Transports behind a [`Backend`](crate::Backend) wait on many sockets at
//! once. [`EventPoller`] wraps [`mio::Poll`] with the small surface they
//! need: register a descriptor with an interest mask and a caller-chosen
//! tag, block with a [`Timeout`], then drain the ready events through a
//! cursor that each `wait` call refills.

use std::{
    collections::{HashMap, VecDeque},
    io,
    os::fd::RawFd,
    time::Duration,
};

use bitflags::bitflags;
use log::warn;
use mio::{Events, Interest, Poll, Token, event::Event, unix::SourceFd};

const INITIAL_EVENT_CAPACITY: usize = 16;

bitflags! {
    /// Interest and readiness flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        /// The descriptor can be read without blocking.
        const READABLE = 1;
        /// The descriptor can be written without blocking.
        const WRITABLE = 1 << 1;
        /// The descriptor reported an error.
        const ERROR = 1 << 2;
        /// The peer closed its end.
        const HANGUP = 1 << 3;
    }
}

impl EventMask {
    fn interest(self) -> io::Result<Interest> {
        match (self.contains(Self::READABLE), self.contains(Self::WRITABLE)) {
            (true, true) => Ok(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Ok(Interest::READABLE),
            (false, true) => Ok(Interest::WRITABLE),
            (false, false) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interest mask must include readable or writable",
            )),
        }
    }

    fn from_event(event: &Event) -> Self {
        let mut mask = Self::empty();
        mask.set(Self::READABLE, event.is_readable());
        mask.set(Self::WRITABLE, event.is_writable());
        mask.set(Self::ERROR, event.is_error());
        mask.set(Self::HANGUP, event.is_read_closed() || event.is_write_closed());
        mask
    }
}

/// How long [`EventPoller::wait`] may block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Block until an event arrives.
    Infinite,
    /// Return at once.
    Immediate,
    /// Block for at most the given duration.
    After(Duration),
}

impl Timeout {
    fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Immediate => Some(Duration::ZERO),
            Self::After(duration) => Some(duration),
        }
    }
}

/// Readiness reported for one registered descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    mask: EventMask,
    tag: usize,
}

impl ReadyEvent {
    /// Readiness flags.
    #[must_use]
    pub const fn mask(&self) -> EventMask { self.mask }

    /// Tag given when the descriptor was registered.
    #[must_use]
    pub const fn tag(&self) -> usize { self.tag }
}

/// Descriptor readiness poller.
pub struct EventPoller {
    poll: Poll,
    events: Events,
    tags: HashMap<RawFd, Token>,
    ready: VecDeque<ReadyEvent>,
}

impl std::fmt::Debug for EventPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPoller")
            .field("registered", &self.tags.len())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl EventPoller {
    /// Create a poller with nothing registered.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the OS poller cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(INITIAL_EVENT_CAPACITY),
            tags: HashMap::new(),
            ready: VecDeque::new(),
        })
    }

    /// Watch `fd` for `interest`, reporting its events under `tag`.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if `interest` names neither readable nor
    /// writable, or the OS rejects the registration.
    pub fn register(&mut self, fd: RawFd, interest: EventMask, tag: usize) -> io::Result<()> {
        let token = Token(tag);
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest.interest()?)?;
        self.tags.insert(fd, token);
        let wanted = INITIAL_EVENT_CAPACITY + self.tags.len();
        if self.events.capacity() < wanted {
            self.events = Events::with_capacity(wanted * 2);
        }
        self.ready.clear();
        Ok(())
    }

    /// Replace the interest of a registered `fd`.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] if `fd` is not registered, or the
    /// OS error if the change is rejected.
    pub fn modify(&mut self, fd: RawFd, interest: EventMask) -> io::Result<()> {
        let token = *self
            .tags
            .get(&fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "descriptor not registered"))?;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), token, interest.interest()?)
    }

    /// Stop watching `fd`. Unknown descriptors are ignored.
    pub fn unregister(&mut self, fd: RawFd) {
        if self.tags.remove(&fd).is_none() {
            return;
        }
        if let Err(err) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            log::debug!("deregistering fd {fd}: {err}");
        }
        self.ready.clear();
    }

    /// Block for readiness and refill the cursor, returning the event count.
    ///
    /// An interrupted or failed wait yields an empty cursor.
    pub fn wait(&mut self, timeout: Timeout) -> usize {
        self.ready.clear();
        if let Err(err) = self.poll.poll(&mut self.events, timeout.as_duration()) {
            if err.kind() != io::ErrorKind::Interrupted {
                warn!("poll wait failed: {err}");
            }
            return 0;
        }
        self.ready.extend(self.events.iter().map(|event| ReadyEvent {
            mask: EventMask::from_event(event),
            tag: event.token().0,
        }));
        self.ready.len()
    }

    /// Whether the cursor is exhausted.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.ready.is_empty() }

    /// Events left in the cursor.
    #[must_use]
    pub fn len(&self) -> usize { self.ready.len() }

    /// Event under the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is empty; check [`EventPoller::is_empty`] first.
    #[must_use]
    pub fn front(&self) -> &ReadyEvent {
        self.ready
            .front()
            .unwrap_or_else(|| panic!("no ready events: check is_empty before front"))
    }

    /// Advance the cursor, returning the event it was on.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is empty.
    pub fn pop_front(&mut self) -> ReadyEvent {
        self.ready
            .pop_front()
            .unwrap_or_else(|| panic!("no ready events: check is_empty before pop_front"))
    }
}
