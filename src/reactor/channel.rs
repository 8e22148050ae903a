use super::core::Reactor;
use super::poller::common::Interest;

use std::fmt;
use std::io;
use std::os::fd::RawFd;

/// A descriptor registered with a [`Reactor`].
///
/// Cloning a channel does not register the descriptor again; every clone
/// designates the same registration. Once unregistered, operations on any
/// clone fail with `NotFound`.
#[derive(Clone)]
pub struct Channel {
    reactor: Reactor,
    fd: RawFd,
    token: u64,
}

impl Channel {
    pub(crate) fn new(reactor: Reactor, fd: RawFd, token: u64) -> Self {
        Self { reactor, fd, token }
    }

    /// Arms the channel for its next notification.
    ///
    /// Safe to call from the channel's own handler and from other threads.
    pub fn arm(&self, interest: Interest) -> io::Result<()> {
        self.reactor.arm(self, interest)
    }

    pub fn unregister(&self) -> io::Result<()> {
        self.reactor.unregister(self)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("fd", &self.fd)
            .field("token", &self.token)
            .finish()
    }
}
