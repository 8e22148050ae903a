/// Not running; the next wake polls the future.
pub(crate) const IDLE: usize = 0;

/// Being polled. At most one thread observes this state at a time.
pub(crate) const RUNNING: usize = 1;

/// Woken while running: the poller polls again before going idle.
pub(crate) const NOTIFIED: usize = 2;

/// The future returned `Ready` and was dropped. Terminal.
pub(crate) const COMPLETED: usize = 3;
