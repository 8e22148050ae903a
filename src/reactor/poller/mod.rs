//! OS readiness primitive.
//!
//! Only Linux `epoll` is supported.

pub(crate) mod common;
pub(crate) mod unix;

mod epoll;

pub(crate) use epoll::EpollPoller as Poller;

pub(crate) use unix as platform;
