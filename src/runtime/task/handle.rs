use crate::error::JoinError;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

enum State<T> {
    Pending(Vec<Waker>),
    Ready(Result<T, JoinError>),
    Consumed,
}

/// One-shot hand-off between a task and its consumers.
pub(crate) struct Slot<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending(Vec::new())),
            ready: Condvar::new(),
        })
    }

    /// Publishes the task's result and resumes every waiter.
    pub(crate) fn deliver(&self, result: Result<T, JoinError>) {
        let previous = mem::replace(&mut *self.state.lock(), State::Ready(result));
        self.ready.notify_all();

        // Woken outside the lock: wakers may resume their task inline.
        if let State::Pending(wakers) = previous {
            for waker in wakers {
                waker.wake();
            }
        }
    }

    fn take(state: &mut State<T>) -> Option<Result<T, JoinError>> {
        match state {
            State::Pending(_) => None,
            State::Consumed => Some(Err(JoinError::AlreadyConsumed)),
            State::Ready(_) => match mem::replace(state, State::Consumed) {
                State::Ready(result) => Some(result),
                _ => unreachable!(),
            },
        }
    }
}

/// Join handle of a task started with [`Task::spawn`](super::Task::spawn).
///
/// The handle can be awaited from another task, or waited on from a plain
/// thread with [`wait`](Self::wait). It can be cloned; the task's value is
/// delivered to exactly one consumer and every other consumer gets
/// [`JoinError::AlreadyConsumed`].
pub struct TaskFuture<T> {
    slot: Arc<Slot<T>>,
}

impl<T> TaskFuture<T> {
    pub(crate) fn new(slot: Arc<Slot<T>>) -> Self {
        Self { slot }
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// Must not be called from the thread that drives the task's progress.
    pub fn wait(&self) -> Result<T, JoinError> {
        let mut state = self.slot.state.lock();

        loop {
            if let Some(result) = Slot::take(&mut state) {
                return result;
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Takes the result if the task already completed.
    pub fn try_take(&self) -> Option<Result<T, JoinError>> {
        Slot::take(&mut self.slot.state.lock())
    }

    /// Returns `true` once the task completed, whether or not its result
    /// was taken.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), State::Pending(_))
    }
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();

        if let State::Pending(wakers) = &mut *state {
            if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
            return Poll::Pending;
        }

        match Slot::take(&mut state) {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("finished", &self.is_finished())
            .finish()
    }
}
