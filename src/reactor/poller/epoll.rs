//! Linux `epoll` poller.
//!
//! Every descriptor is registered one-shot and edge-triggered: the kernel
//! reports at most one event per arming, after which the descriptor stays
//! silent until it is re-armed. A private `eventfd` lets other threads
//! interrupt a blocking wait.

use super::common::Interest;
use super::unix::{sys_close, sys_eventfd, sys_eventfd_drain, sys_eventfd_signal};
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait,
};
use parking_lot::Mutex;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Reserved token of the wake-up eventfd.
///
/// Reactor tokens keep the top bit of their generation clear, so they
/// never reach this value.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

const EVENT_CAPACITY: usize = 64;

pub(crate) struct EpollPoller {
    epoll: RawFd,

    /// Wake-up eventfd, registered level-triggered for the poller's lifetime.
    wake: RawFd,

    /// Reusable kernel event buffer.
    buffer: Mutex<Vec<epoll_event>>,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake = match sys_eventfd() {
            Ok(fd) => fd,
            Err(error) => {
                sys_close(epoll);
                return Err(error);
            }
        };

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        if unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, wake, &mut event) } < 0 {
            let error = io::Error::last_os_error();
            sys_close(wake);
            sys_close(epoll);
            return Err(error);
        }

        Ok(Self {
            epoll,
            wake,
            buffer: Mutex::new(Vec::with_capacity(EVENT_CAPACITY)),
        })
    }

    /// Interrupts a blocking [`wait`](Self::wait), now or on its next call.
    pub(crate) fn wake(&self) {
        sys_eventfd_signal(self.wake);
    }

    /// Adds `fd`, armed for `interest`.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Re-arms `fd` for `interest`. An empty interest leaves it disarmed.
    pub(crate) fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn control(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest.epoll_flags() | (EPOLLONESHOT | EPOLLET) as u32,
            u64: token,
        };

        if unsafe { epoll_ctl(self.epoll, op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Waits for readiness and appends the events to `events`.
    ///
    /// Returns early when woken; the wake-up itself is not reported.
    /// `None` blocks indefinitely.
    pub(crate) fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = match timeout {
            None => -1,
            Some(timeout) => {
                // Round up so short timeouts do not spin.
                let ms = timeout.as_nanos().div_ceil(1_000_000);
                ms.min(i32::MAX as u128) as i32
            }
        };

        let mut buffer = self.buffer.lock();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                buffer.as_mut_ptr(),
                buffer.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(error);
        }

        // Safety: epoll_wait initialized the first `n` entries.
        unsafe {
            buffer.set_len(n as usize);
        }

        for event in buffer.iter() {
            let token = event.u64;

            if token == WAKE_TOKEN {
                sys_eventfd_drain(self.wake);
                continue;
            }

            let flags = event.events;
            let failed = flags & (EPOLLERR | EPOLLHUP) as u32 != 0;

            events.push(Event {
                token,
                readable: failed || flags & (EPOLLIN | EPOLLRDHUP) as u32 != 0,
                writable: failed || flags & EPOLLOUT as u32 != 0,
            });
        }

        buffer.clear();

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        sys_close(self.wake);
        sys_close(self.epoll);
    }
}
