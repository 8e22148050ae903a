use super::state::{COMPLETED, IDLE, NOTIFIED, RUNNING};
use super::waker::make_waker;

use std::cell::UnsafeCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Context;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Owner of a detached future.
///
/// There is no scheduler: whoever wakes an idle harness polls it right
/// away, on its own thread. A wake that lands while another thread is
/// polling moves the state to `NOTIFIED`, and that poller loops instead of
/// going idle, so wakes are never lost and the future never has two
/// pollers.
pub(crate) struct Harness {
    /// `None` once completed. Only touched in the `RUNNING` state.
    future: UnsafeCell<Option<BoxFuture>>,

    state: AtomicUsize,
}

unsafe impl Send for Harness {}
unsafe impl Sync for Harness {}

impl Harness {
    /// Takes ownership of `future` and polls it once on the calling thread.
    pub(crate) fn start<F>(future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let harness = Arc::new(Self {
            future: UnsafeCell::new(Some(Box::pin(future))),
            state: AtomicUsize::new(IDLE),
        });

        harness.wake();
    }

    /// Resumes the future, inline if nobody is polling it.
    pub(crate) fn wake(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.run();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already notified, or nothing left to resume.
                _ => return,
            }
        }
    }

    /// Polls until the future is pending with no wake outstanding, or
    /// completes. Called with the state set to `RUNNING`.
    fn run(self: &Arc<Self>) {
        let waker = make_waker(self.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            // Safety: RUNNING grants exclusive access to the future cell.
            let slot = unsafe { &mut *self.future.get() };

            let done = match slot.as_mut() {
                Some(future) => future.as_mut().poll(&mut cx).is_ready(),
                None => true,
            };

            if done {
                // Dropped exactly once, still under RUNNING.
                slot.take();
                self.state.store(COMPLETED, Ordering::Release);
                return;
            }

            match self
                .state
                .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(_) => {
                    // NOTIFIED while polling: only this thread can move it.
                    self.state.store(RUNNING, Ordering::Release);
                }
            }
        }
    }
}
