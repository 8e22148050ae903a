use ucxio::{JoinError, Task, block_on, yield_now};

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};
use std::thread;

/// A future resolved by another thread.
#[derive(Default)]
struct Gate {
    open: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl Gate {
    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);

        let waker = self.waker.lock().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn wait(self: &Arc<Self>) -> GateWait {
        GateWait(self.clone())
    }
}

struct GateWait(Arc<Gate>);

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut waker = self.0.waker.lock();

        if self.0.open.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        *waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Counts how many times it is dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_detached_task_runs_before_detach_returns() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();

    Task::new(async move { flag.store(true, Ordering::SeqCst) }).detach();

    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_detached_task_resumes_on_waking_thread_and_is_released_once() {
    let gate = Arc::new(Gate::default());
    let drops = Arc::new(AtomicUsize::new(0));
    let resumed_on = Arc::new(Mutex::new(None));

    let counter = DropCounter(drops.clone());
    let wait = gate.wait();
    let slot = resumed_on.clone();

    Task::new(async move {
        let _counter = counter;
        wait.await;
        *slot.lock() = Some(thread::current().id());
    })
    .detach();

    assert_eq!(drops.load(Ordering::SeqCst), 0);

    let opener = thread::spawn(move || {
        gate.open();
        thread::current().id()
    });
    let opener_id = opener.join().unwrap();

    assert_eq!(*resumed_on.lock(), Some(opener_id));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_join_result_is_delivered_to_one_consumer() {
    let gate = Arc::new(Gate::default());
    let wait = gate.wait();

    let handle = Task::new(async move {
        wait.await;
        String::from("value")
    })
    .spawn();

    assert!(!handle.is_finished());

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || handle.wait())
        })
        .collect();

    gate.open();

    let mut results: Vec<_> = consumers
        .into_iter()
        .map(|consumer| consumer.join().unwrap())
        .collect();
    results.sort_by_key(Result::is_err);

    assert_eq!(results[0], Ok(String::from("value")));
    assert_eq!(results[1], Err(JoinError::AlreadyConsumed));
    assert!(handle.is_finished());
    assert_eq!(handle.try_take(), Some(Err(JoinError::AlreadyConsumed)));
}

#[test]
fn test_panicking_task_reports_its_message() {
    let handle = Task::new(async {
        yield_now().await;
        panic!("boom");
    })
    .spawn();

    let result: Result<(), JoinError> = handle.wait();
    assert_eq!(result, Err(JoinError::Panicked(String::from("boom"))));
}

#[test]
fn test_task_can_be_awaited_directly() {
    let task = Task::new(async { 40 + 2 });
    assert_eq!(block_on(task), 42);

    let handle = Task::new(async { 7 }).spawn();
    assert_eq!(block_on(handle), Ok(7));
}

#[test]
fn test_concurrent_wakes_run_the_task_to_completion_once() {
    let polls = Arc::new(AtomicUsize::new(0));
    let drops = Arc::new(AtomicUsize::new(0));
    let waker: Arc<Mutex<Option<Waker>>> = Arc::default();

    struct Stubborn {
        polls: Arc<AtomicUsize>,
        waker: Arc<Mutex<Option<Waker>>>,
        _counter: DropCounter,
    }

    impl Future for Stubborn {
        type Output = usize;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.waker.lock() = Some(cx.waker().clone());

            if n >= 50 { Poll::Ready(n) } else { Poll::Pending }
        }
    }

    let handle = Task::new(Stubborn {
        polls: polls.clone(),
        waker: waker.clone(),
        _counter: DropCounter(drops.clone()),
    })
    .spawn();

    let wakers: Vec<_> = (0..4)
        .map(|_| {
            let waker = waker.clone();
            let handle = handle.clone();
            thread::spawn(move || {
                while !handle.is_finished() {
                    let current = waker.lock().clone();
                    if let Some(current) = current {
                        current.wake();
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for waker in wakers {
        waker.join().unwrap();
    }

    assert!(handle.wait().unwrap() >= 50);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
