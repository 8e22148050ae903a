//! Deferred tasks.
//!
//! A [`Task`] wraps a future without running it. It can then be:
//! - awaited directly, like any future,
//! - [detached](Task::detach): started immediately on the calling thread
//!   and resumed inline by whichever thread wakes it,
//! - [spawned](Task::spawn): started the same way, with its result handed
//!   to a [`TaskFuture`].
//!
//! There is no executor. Completion callbacks of transport operations wake
//! tasks from the thread that progresses the worker, and the task resumes
//! on that thread.

mod core;
mod handle;
mod state;
mod unwind;
mod waker;

pub use handle::TaskFuture;

use self::core::Harness;
use crate::error::JoinError;
use handle::Slot;
use unwind::CatchUnwind;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::warn;

/// A suspended unit of asynchronous work.
#[must_use = "tasks do nothing unless awaited, detached or spawned"]
pub struct Task<T> {
    future: Pin<Box<dyn Future<Output = T> + Send>>,
}

impl<T: Send + 'static> Task<T> {
    /// Wraps `future`. Nothing runs until the task is awaited, detached or
    /// spawned.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// Runs the task to completion without observing it.
    ///
    /// The first poll happens before `detach` returns. The result is
    /// dropped; a panic is caught and logged.
    pub fn detach(self) {
        let future = CatchUnwind::new(self.future);

        Harness::start(async move {
            if let Err(message) = future.await {
                warn!(panic = %message, "detached task panicked");
            }
        });
    }

    /// Starts the task and returns a handle to its result.
    ///
    /// The first poll happens before `spawn` returns.
    pub fn spawn(self) -> TaskFuture<T> {
        let slot = Slot::new();
        let handle = TaskFuture::new(slot.clone());
        let future = CatchUnwind::new(self.future);

        Harness::start(async move {
            let result = future.await.map_err(JoinError::Panicked);
            slot.deliver(result);
        });

        handle
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
