use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

struct ThreadWaker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Runs `future` to completion on the current thread.
///
/// The thread parks between wakes. Something else must make progress
/// meanwhile: a [`ProgressThread`](crate::progress::ProgressThread), or
/// wakes coming from a future that progresses the worker itself.
///
/// # Examples
///
/// ```rust,ignore
/// let received = block_on(endpoint.stream_recv(&mut buffer))?;
/// ```
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);

    let signal = Arc::new(ThreadWaker {
        thread: thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(signal.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }

        while !signal.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}
