use crate::transport::{Completion, CompletionInfo, Status};

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};

/// Nobody is waiting and the transport has not completed yet.
const UNSET: u8 = 0;

/// A waker is installed and the transport has not completed yet.
const WAITING: u8 = 1;

/// The transport completed. Terminal.
const COMPLETED: u8 = 2;

/// Result of an operation as reported by the transport.
pub(crate) type Outcome = Result<CompletionInfo, Status>;

/// One in-flight transport call.
///
/// The operation is shared between the future waiting on it and the
/// transport, which holds it as its completion handle. Its resumption slot
/// resolves the race between the two sides:
///
/// - the waiter publishes its waker and moves `UNSET -> WAITING`,
/// - the transport stores the outcome and swaps the state to `COMPLETED`.
///
/// Whichever side arrives second performs the resumption: the transport
/// wakes the installed waker, or the waiter observes `COMPLETED` and
/// resolves inline. The waker cell is only written while the state is
/// `UNSET` and owned by the waiter, and only read by the transport after
/// it observed `WAITING`, so the two never touch it concurrently.
pub(crate) struct Operation {
    state: AtomicU8,

    /// Waker of the suspended consumer.
    waker: UnsafeCell<Option<Waker>>,

    /// Written once by the transport before `COMPLETED` is published.
    outcome: UnsafeCell<Option<Outcome>>,
}

unsafe impl Send for Operation {}
unsafe impl Sync for Operation {}

impl Operation {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(UNSET),
            waker: UnsafeCell::new(None),
            outcome: UnsafeCell::new(None),
        })
    }

    /// Returns `true` once the transport completed the operation.
    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }

    /// Registers the current task, or returns the outcome if the transport
    /// already completed.
    ///
    /// Must only be called by the single consumer of the operation.
    pub(crate) fn poll_complete(&self, cx: &mut Context<'_>) -> Poll<Outcome> {
        match self.state.load(Ordering::Acquire) {
            COMPLETED => return Poll::Ready(self.take_outcome()),
            WAITING => {
                // Re-poll: take the slot back before touching the waker.
                if self
                    .state
                    .compare_exchange(WAITING, UNSET, Ordering::Acquire, Ordering::Acquire)
                    .is_err()
                {
                    return Poll::Ready(self.take_outcome());
                }
            }
            _ => {}
        }

        // Safety: the state is UNSET and only the consumer moves it out of
        // UNSET toward WAITING, so the transport does not read the cell.
        unsafe {
            *self.waker.get() = Some(cx.waker().clone());
        }

        match self
            .state
            .compare_exchange(UNSET, WAITING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Poll::Pending,
            Err(_) => {
                // Completed between the load and the publish: resume inline.
                unsafe {
                    (*self.waker.get()).take();
                }
                Poll::Ready(self.take_outcome())
            }
        }
    }

    fn take_outcome(&self) -> Outcome {
        // Safety: COMPLETED was observed with Acquire ordering, so the
        // transport's write is visible and will not happen again.
        unsafe {
            (*self.outcome.get())
                .take()
                .expect("operation outcome already consumed")
        }
    }
}

impl Completion for Operation {
    fn complete(&self, status: Status, info: CompletionInfo) {
        debug_assert_ne!(
            self.state.load(Ordering::Relaxed),
            COMPLETED,
            "transport completed an operation twice"
        );

        let outcome = if status.is_ok() { Ok(info) } else { Err(status) };

        // Safety: the consumer reads the outcome only after observing
        // COMPLETED, which is published below with Release ordering.
        unsafe {
            *self.outcome.get() = Some(outcome);
        }

        if self.state.swap(COMPLETED, Ordering::AcqRel) == WAITING {
            // Safety: WAITING was published by the consumer after it wrote
            // the waker, and it cannot reclaim the slot anymore.
            let waker = unsafe { (*self.waker.get()).take() };

            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;
    use std::thread;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        (counter, waker)
    }

    #[test]
    fn test_completion_before_registration_resolves_inline() {
        let op = Operation::new();
        op.complete(Status::OK, CompletionInfo::Received(7));

        let (counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);

        assert_eq!(
            op.poll_complete(&mut cx),
            Poll::Ready(Ok(CompletionInfo::Received(7)))
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_completion_after_registration_wakes_once() {
        let op = Operation::new();
        let (counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);

        assert!(op.poll_complete(&mut cx).is_pending());
        op.complete(Status::CANCELED, CompletionInfo::None);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(op.poll_complete(&mut cx), Poll::Ready(Err(Status::CANCELED)));
    }

    #[test]
    fn test_repoll_replaces_waker() {
        let op = Operation::new();
        let (first, first_waker) = counting();
        let (second, second_waker) = counting();

        assert!(
            op.poll_complete(&mut Context::from_waker(&first_waker))
                .is_pending()
        );
        assert!(
            op.poll_complete(&mut Context::from_waker(&second_waker))
                .is_pending()
        );

        op.complete(Status::OK, CompletionInfo::None);

        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_complete_and_register() {
        for _ in 0..1_000 {
            let op = Operation::new();
            let (counter, waker) = counting();

            let remote = op.clone();
            let completer = thread::spawn(move || {
                remote.complete(Status::OK, CompletionInfo::Fetched(42));
            });

            let mut cx = Context::from_waker(&waker);
            let inline = op.poll_complete(&mut cx);

            completer.join().unwrap();

            match inline {
                Poll::Ready(outcome) => {
                    assert_eq!(outcome, Ok(CompletionInfo::Fetched(42)));
                    assert_eq!(counter.0.load(Ordering::SeqCst), 0);
                }
                Poll::Pending => {
                    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
                    assert_eq!(
                        op.poll_complete(&mut cx),
                        Poll::Ready(Ok(CompletionInfo::Fetched(42)))
                    );
                }
            }
        }
    }
}
