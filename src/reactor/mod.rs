//! Readiness reactor.
//!
//! A [`Reactor`] multiplexes registered descriptors over one epoll
//! instance and runs each channel's handler when it becomes ready:
//! - [`Reactor::register`] adds a descriptor with a handler and an armed
//!   [`Interest`], returning its [`Channel`],
//! - [`Channel::arm`] re-arms after a notification,
//! - [`Reactor::poll`] dispatches once, [`Reactor::run`] until closed,
//! - [`Reactor::close`] stops `run` from any thread.

mod channel;
mod core;
mod event;

pub(crate) mod poller;

pub use channel::Channel;
pub use self::core::{Handler, Reactor};
pub use event::Ready;
pub use poller::common::Interest;
