use super::register_loop;
use crate::error::Result;
use crate::reactor::{Channel, Reactor};
use crate::worker::Worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

/// How a [`ProgressThread`] waits for work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressMode {
    /// Spin on `progress()`. Lowest latency, one core fully used.
    Busy,
    /// Sleep in the reactor until the worker's event descriptor fires.
    /// Requires the `WAKEUP` feature.
    Event,
}

/// Configuration of a [`ProgressThread`].
#[derive(Clone, Debug)]
pub struct ProgressConfig {
    mode: ProgressMode,
    idle_interval: Duration,
}

impl ProgressConfig {
    pub fn new() -> Self {
        Self {
            mode: ProgressMode::Event,
            idle_interval: Duration::from_millis(10),
        }
    }

    pub fn mode(mut self, mode: ProgressMode) -> Self {
        self.mode = mode;
        self
    }

    /// Longest sleep of an event-driven loop before it re-checks whether
    /// it should stop.
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "idle_interval must be > 0");

        self.idle_interval = interval;
        self
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread dedicated to progressing one worker.
///
/// The thread also drives its [`reactor`](Self::reactor): sockets
/// registered there (bootstrap connections, typically) are served by the
/// same thread. It stops when it holds the last reference to the worker,
/// or on [`shutdown`](Self::shutdown); dropping the handle shuts it down.
pub struct ProgressThread {
    reactor: Reactor,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressThread {
    pub fn spawn(worker: Arc<Worker>, config: ProgressConfig) -> Result<Self> {
        let reactor = Reactor::new()?;
        let stop = Arc::new(AtomicBool::new(false));

        let body: Box<dyn FnOnce() + Send> = match config.mode {
            ProgressMode::Busy => {
                let reactor = reactor.clone();
                let stop = stop.clone();
                Box::new(move || run_busy(worker, reactor, stop))
            }
            ProgressMode::Event => {
                let weak = Arc::downgrade(&worker);
                let channel = register_loop(worker, &reactor)?;

                let stop = stop.clone();
                let interval = config.idle_interval;
                Box::new(move || run_event(weak, channel, stop, interval))
            }
        };

        let handle = thread::Builder::new()
            .name(String::from("ucxio-progress"))
            .spawn(body)?;

        debug!(mode = ?config.mode, "progress thread spawned");

        Ok(Self {
            reactor,
            stop,
            handle: Some(handle),
        })
    }

    /// Reactor driven by this thread.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the thread and waits for it.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop.store(true, Ordering::Release);
        self.reactor.close();

        if handle.join().is_err() {
            warn!("progress thread panicked");
        }
    }
}

impl Drop for ProgressThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_busy(worker: Arc<Worker>, reactor: Reactor, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) && Arc::strong_count(&worker) > 1 {
        let progressed = worker.progress();

        // Sockets on the reactor are served between progress rounds.
        match reactor.poll(Some(Duration::ZERO)) {
            Ok(0) if !progressed => std::hint::spin_loop(),
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "reactor poll failed");
                break;
            }
        }
    }

    finish(&reactor);
    while worker.progress() {}

    debug!("busy progress loop stopped");
}

fn run_event(
    worker: Weak<Worker>,
    channel: Channel,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let reactor = channel.reactor();

    // The channel's handler owns one reference: one more means someone
    // can still issue operations.
    while !stop.load(Ordering::Acquire) && worker.strong_count() > 1 {
        if let Err(error) = reactor.poll(Some(interval)) {
            warn!(%error, "reactor poll failed");
            break;
        }
    }

    finish(reactor);

    // Already gone if the handler saw the last reference go.
    let _ = channel.unregister();

    if let Some(worker) = worker.upgrade() {
        while worker.progress() {}
    }

    debug!("event progress loop stopped");
}

/// Closes the reactor and lets channel handlers observe it once.
fn finish(reactor: &Reactor) {
    reactor.close();

    if let Err(error) = reactor.poll(Some(Duration::ZERO)) {
        warn!(%error, "final reactor poll failed");
    }
}
