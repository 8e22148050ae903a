//! Reactor-driven networking.
//!
//! Sockets register with a [`Reactor`](crate::reactor::Reactor) and wait
//! for readiness on the same completion slot the transport requests use.
//! Nothing happens unless some thread polls that reactor, typically a
//! [`ProgressThread`](crate::progress::ProgressThread).

mod source;

pub mod tcp;

pub use tcp::{TcpListener, TcpStream};
