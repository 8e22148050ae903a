use crate::reactor::poller::platform::sys_close;
use crate::reactor::{Channel, Interest, Reactor, Ready};
use crate::request::Operation;
use crate::transport::{Completion, CompletionInfo, Status};

use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Operations parked on a socket, one per direction.
///
/// The channel handler completes them; the waiting futures then retry
/// their syscall.
#[derive(Default)]
struct Waiters {
    read: Mutex<Option<Arc<Operation>>>,
    write: Mutex<Option<Arc<Operation>>>,
}

impl Waiters {
    fn slot(&self, direction: Direction) -> &Mutex<Option<Arc<Operation>>> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    fn interest(&self) -> Interest {
        let mut interest = Interest::NONE;

        if self.read.lock().is_some() {
            interest = interest | Interest::READABLE;
        }
        if self.write.lock().is_some() {
            interest = interest | Interest::WRITABLE;
        }

        interest
    }

    fn notify(&self, ready: Ready) {
        if ready.is_readable() {
            if let Some(operation) = self.read.lock().take() {
                operation.complete(Status::OK, CompletionInfo::None);
            }
        }

        if ready.is_writable() {
            if let Some(operation) = self.write.lock().take() {
                operation.complete(Status::OK, CompletionInfo::None);
            }
        }
    }
}

/// A non-blocking socket registered with a reactor.
///
/// Owns the descriptor: dropping the source unregisters and closes it.
/// One reader and one writer may wait at a time.
pub(crate) struct Source {
    fd: RawFd,
    channel: Channel,
    waiters: Arc<Waiters>,
}

impl Source {
    /// Registers `fd`, disarmed. Closes `fd` if registration fails.
    pub(crate) fn new(reactor: &Reactor, fd: RawFd) -> io::Result<Self> {
        let waiters = Arc::new(Waiters::default());
        let notified = waiters.clone();

        let channel = reactor.register(fd, Interest::NONE, move |ready, _| notified.notify(ready));

        match channel {
            Ok(channel) => Ok(Self {
                fd,
                channel,
                waiters,
            }),
            Err(error) => {
                sys_close(fd);
                Err(error)
            }
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Runs `syscall` until it stops reporting `WouldBlock`, waiting for
    /// readiness in `direction` in between.
    pub(crate) async fn io<T>(
        &self,
        direction: Direction,
        mut syscall: impl FnMut(RawFd) -> io::Result<T>,
    ) -> io::Result<T> {
        loop {
            match syscall(self.fd) {
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    self.ready(direction).await?;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }

    /// Waits for one readiness notification in `direction`.
    pub(crate) fn ready(&self, direction: Direction) -> Readiness<'_> {
        Readiness {
            source: self,
            direction,
            operation: None,
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Err(error) = self.channel.unregister() {
            trace!(fd = self.fd, %error, "socket channel already unregistered");
        }
        sys_close(self.fd);
    }
}

/// Future of [`Source::ready`].
pub(crate) struct Readiness<'a> {
    source: &'a Source,
    direction: Direction,
    operation: Option<Arc<Operation>>,
}

impl Future for Readiness<'_> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.operation.is_none() {
            let operation = Operation::new();
            let waiters = &this.source.waiters;

            *waiters.slot(this.direction).lock() = Some(operation.clone());
            this.operation = Some(operation);

            if let Err(error) = this.source.channel.arm(waiters.interest()) {
                waiters.slot(this.direction).lock().take();
                this.operation = None;
                return Poll::Ready(Err(error));
            }
        }

        match this.operation.as_ref().map(|operation| operation.poll_complete(cx)) {
            Some(Poll::Ready(_)) => {
                this.operation = None;
                Poll::Ready(Ok(()))
            }
            _ => Poll::Pending,
        }
    }
}

impl Drop for Readiness<'_> {
    fn drop(&mut self) {
        let Some(operation) = self.operation.take() else {
            return;
        };

        let mut slot = self.source.waiters.slot(self.direction).lock();

        if slot
            .as_ref()
            .is_some_and(|parked| Arc::ptr_eq(parked, &operation))
        {
            slot.take();
        }
    }
}
