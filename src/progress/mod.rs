//! Worker progress integration.
//!
//! Transport completions only fire while someone calls
//! [`Worker::progress`]. This module offers three ways to do it:
//! - [`busy_poll`] spins on the calling thread,
//! - [`register_loop`] hooks the worker's event descriptor into a
//!   [`Reactor`], progressing only when the worker signals activity,
//! - [`ProgressThread`] runs either mode on a dedicated thread.
//!
//! Loops stop on their own once they hold the last reference to the
//! worker: nobody is left to issue operations on it.

mod thread;

pub use thread::{ProgressConfig, ProgressMode, ProgressThread};

use crate::error::Result;
use crate::reactor::{Channel, Interest, Reactor};
use crate::worker::Worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// Progresses `worker` until idle, then arms it.
///
/// Re-drains whenever arming reports that work raced in, so no completion
/// is left behind once this returns.
pub fn drain(worker: &Worker) -> Result<()> {
    loop {
        while worker.progress() {}

        if worker.arm()? {
            return Ok(());
        }
    }
}

/// Spins on `worker.progress()` until `stop` is set or `worker` is the
/// last reference to the worker.
pub fn busy_poll(worker: &Arc<Worker>, stop: &AtomicBool) {
    debug!("busy progress loop started");

    while !stop.load(Ordering::Acquire) && Arc::strong_count(worker) > 1 {
        if !worker.progress() {
            std::hint::spin_loop();
        }
    }

    while worker.progress() {}

    debug!("busy progress loop stopped");
}

/// Registers `worker`'s event descriptor with `reactor`.
///
/// Each notification drains and re-arms the worker. The channel keeps
/// re-arming while other references to the worker exist and the reactor
/// is open; otherwise it unregisters itself, releasing `worker`.
///
/// Requires the `WAKEUP` feature.
pub fn register_loop(worker: Arc<Worker>, reactor: &Reactor) -> Result<Channel> {
    let fd = worker.event_fd()?;

    drain(&worker)?;

    let channel = reactor.register(fd, Interest::READABLE, move |_, channel| {
        if let Err(error) = drain(&worker) {
            warn!(%error, "failed to drain worker");
        }

        if Arc::strong_count(&worker) > 1 && !channel.reactor().is_closed() {
            if let Err(error) = channel.arm(Interest::READABLE) {
                warn!(%error, "failed to re-arm worker channel");
            }
        } else {
            debug!("worker released, leaving event progress loop");
            // The handler, and with it `worker`, drops once it returns.
            let _ = channel.unregister();
        }
    })?;

    debug!(fd, "event progress loop registered");

    Ok(channel)
}
