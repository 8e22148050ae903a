use crate::context::Features;
use crate::transport::Status;

use std::io;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by transport operations, the bootstrap channel and the
/// object model around them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport reported a non-success status.
    #[error("{context}: {status}")]
    Transport {
        status: Status,
        context: &'static str,
    },

    /// The bootstrap control channel was closed or stalled mid-handshake.
    #[error("bootstrap: {0}")]
    Bootstrap(&'static str),

    /// Socket, epoll or eventfd failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The endpoint already started closing.
    #[error("endpoint is closed")]
    EndpointClosed,

    /// The operation requires a feature the context was built without.
    #[error("feature not enabled on context: {0:?}")]
    FeatureDisabled(Features),

    /// The transport could not resolve a peer address blob.
    #[error("invalid remote address ({0} bytes)")]
    InvalidAddress(usize),

    /// The transport could not unpack a remote key blob.
    #[error("invalid packed remote key ({0} bytes)")]
    InvalidRkey(usize),
}

impl Error {
    /// Builds a transport error from a status code.
    pub(crate) fn transport(status: Status, context: &'static str) -> Self {
        Self::Transport { status, context }
    }

    /// Returns the transport status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Converts a transport status into a `Result`, the way every
/// synchronous transport call is checked.
pub(crate) fn check(status: Status, context: &'static str) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(Error::transport(status, context))
    }
}

/// Failure to obtain the result of a spawned task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Another consumer already took the result.
    #[error("task result already consumed")]
    AlreadyConsumed,

    /// The task panicked; carries the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),
}
