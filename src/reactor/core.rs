use super::channel::Channel;
use super::event::{Event, Ready};
use super::poller::Poller;
use super::poller::common::Interest;
use crate::utils::Slab;

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

/// Readiness handler of a channel.
pub type Handler = Box<dyn FnMut(Ready, &Channel) + Send>;

/// Generations keep their top bit clear so no token equals the wake token.
const GENERATION_MASK: u32 = 0x7FFF_FFFF;

pub(crate) struct Entry {
    fd: RawFd,
    generation: u32,

    /// Interest currently armed in the kernel.
    armed: Interest,

    /// Taken out while the handler runs.
    handler: Option<Handler>,
}

pub(crate) struct Shared {
    poller: Poller,
    entries: Mutex<Slab<Entry>>,
    closed: AtomicBool,
    generation: AtomicU32,

    /// Event buffer reused across polls.
    events: Mutex<Vec<Event>>,
}

/// Single-threaded readiness dispatcher.
///
/// Channels may be registered and armed from any thread; handlers only run
/// on the thread calling [`poll`](Self::poll) or [`run`](Self::run). A
/// handler runs without the reactor lock held, so it may re-arm or
/// unregister its own channel, or register new ones.
///
/// The reactor is a cheap handle: clones share the same epoll instance.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

fn token(index: usize, generation: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

fn split(token: u64) -> (usize, u32) {
    ((token & 0xFFFF_FFFF) as usize, (token >> 32) as u32)
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                poller: Poller::new()?,
                entries: Mutex::new(Slab::new(64)),
                closed: AtomicBool::new(false),
                generation: AtomicU32::new(0),
                events: Mutex::new(Vec::with_capacity(64)),
            }),
        })
    }

    /// Registers `fd` and arms it for `interest`.
    ///
    /// `handler` runs once per delivered notification. A channel is
    /// one-shot: after a notification the delivered directions stay
    /// disarmed until [`Channel::arm`] is called again. Registering with
    /// [`Interest::NONE`] adds the descriptor disarmed.
    ///
    /// The reactor does not own `fd`; unregister it before closing it.
    pub fn register<F>(&self, fd: RawFd, interest: Interest, handler: F) -> io::Result<Channel>
    where
        F: FnMut(Ready, &Channel) + Send + 'static,
    {
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) & GENERATION_MASK;

        let mut entries = self.shared.entries.lock();

        let index = entries.insert(Entry {
            fd,
            generation,
            armed: interest,
            handler: Some(Box::new(handler)),
        });

        let token = token(index, generation);

        if let Err(error) = self.shared.poller.register(fd, token, interest) {
            let entry = entries.remove(index);
            drop(entries);
            drop(entry);
            return Err(error);
        }

        debug!(fd, token, ?interest, "channel registered");

        Ok(Channel::new(self.clone(), fd, token))
    }

    /// Re-arms a channel. Replaces the previously armed interest.
    pub(crate) fn arm(&self, channel: &Channel, interest: Interest) -> io::Result<()> {
        let (index, generation) = split(channel.token());
        let mut entries = self.shared.entries.lock();

        let entry = match entries.get_mut(index) {
            Some(entry) if entry.generation == generation => entry,
            _ => return Err(stale()),
        };

        entry.armed = interest;
        self.shared.poller.rearm(entry.fd, channel.token(), interest)
    }

    /// Removes a channel. Its handler is dropped, or is dropped as soon as
    /// it returns when called from inside it.
    ///
    /// Unregistering twice fails with `NotFound`.
    pub fn unregister(&self, channel: &Channel) -> io::Result<()> {
        let (index, generation) = split(channel.token());

        let entry = {
            let mut entries = self.shared.entries.lock();

            match entries.get_mut(index) {
                Some(entry) if entry.generation == generation => {}
                _ => return Err(stale()),
            }

            entries.remove(index)
        };

        let result = match entry.as_ref() {
            Some(entry) => self.shared.poller.deregister(entry.fd),
            None => Ok(()),
        };

        debug!(fd = channel.fd(), "channel unregistered");

        // Dropped outside the lock: handlers may own arbitrary state.
        drop(entry);

        result
    }

    /// Waits at most `timeout` for readiness and dispatches every ready
    /// channel once. `None` waits until an event or [`close`](Self::close).
    ///
    /// Returns the number of handlers run.
    pub fn poll(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut events = mem::take(&mut *self.shared.events.lock());

        let result = self
            .shared
            .poller
            .wait(&mut events, timeout)
            .map(|()| events.drain(..).filter(|event| self.dispatch(event)).count());

        events.clear();
        *self.shared.events.lock() = events;

        result
    }

    fn dispatch(&self, event: &Event) -> bool {
        let (index, generation) = split(event.token);

        let (mut handler, ready, fd) = {
            let mut entries = self.shared.entries.lock();

            let entry = match entries.get_mut(index) {
                Some(entry) if entry.generation == generation => entry,
                _ => return false,
            };

            let ready = Ready {
                readable: event.readable && entry.armed.read,
                writable: event.writable && entry.armed.write,
            };

            let fired = Interest {
                read: ready.readable,
                write: ready.writable,
            };

            // The kernel disarmed the whole interest; restore what did not fire.
            let rest = entry.armed.without(fired);
            entry.armed = rest;

            if !rest.is_empty() {
                if let Err(error) = self.shared.poller.rearm(entry.fd, event.token, rest) {
                    debug!(fd = entry.fd, %error, "failed to re-arm unfired interest");
                }
            }

            if fired.is_empty() {
                return false;
            }

            match entry.handler.take() {
                Some(handler) => (handler, ready, entry.fd),
                None => return false,
            }
        };

        trace!(fd, ?ready, "dispatching channel");

        let channel = Channel::new(self.clone(), fd, event.token);
        handler(ready, &channel);

        let mut entries = self.shared.entries.lock();

        match entries.get_mut(index) {
            Some(entry) if entry.generation == generation && entry.handler.is_none() => {
                entry.handler = Some(handler);
            }
            _ => {
                drop(entries);
                drop(handler);
            }
        }

        true
    }

    /// Dispatches until [`close`](Self::close) is called, then drains once
    /// more without blocking so handlers can observe
    /// [`is_closed`](Self::is_closed) and unregister.
    pub fn run(&self) -> io::Result<()> {
        while !self.is_closed() {
            self.poll(None)?;
        }

        self.poll(Some(Duration::ZERO))?;

        debug!("reactor stopped");

        Ok(())
    }

    /// Marks the reactor closed and interrupts a blocking poll.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.poller.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of registered channels.
    pub fn channels(&self) -> usize {
        self.shared.entries.lock().len()
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("closed", &self.is_closed())
            .field("channels", &self.channels())
            .finish()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Handlers are dropped before the poller closes its descriptors.
        let entries = self.entries.get_mut().drain();
        drop(entries);
    }
}

fn stale() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "channel is not registered")
}
