/// A readiness event reported by the poller.
pub(crate) struct Event {
    /// Token of the registered channel.
    pub(crate) token: u64,

    /// Readable, hung up or failed.
    pub(crate) readable: bool,

    /// Writable, hung up or failed.
    pub(crate) writable: bool,
}

/// Readiness delivered to a channel handler.
///
/// Only directions the channel was armed for are reported. Errors and
/// hang-ups are reported as readiness so the handler retries its syscall
/// and observes the failure there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ready {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Ready {
    pub fn is_readable(self) -> bool {
        self.readable
    }

    pub fn is_writable(self) -> bool {
        self.writable
    }
}
