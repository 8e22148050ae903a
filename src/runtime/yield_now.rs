use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspends once, waking itself immediately.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.0 {
            self.0 = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Poll::Ready(())
    }
}

/// Yields once to whoever drives the current task.
///
/// Inside a task the wake lands while the task is running, so the task is
/// polled again right after returning. Useful in loops that poll a worker
/// by hand:
///
/// ```rust,ignore
/// while !done.load(Ordering::Acquire) {
///     worker.progress();
///     yield_now().await;
/// }
/// ```
pub async fn yield_now() {
    YieldOnce(false).await
}
