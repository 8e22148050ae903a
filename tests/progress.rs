mod common;

use ucxio::progress::{self, ProgressConfig, ProgressMode, ProgressThread};
use ucxio::reactor::Reactor;
use ucxio::transport::TAG_MASK_FULL;
use ucxio::transport::loopback::Loopback;
use ucxio::{Config, Context, Endpoint, Error, RemoteAddress, Task, Worker, block_on};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::task::{Context as TaskContext, Waker};
use std::thread;
use std::time::{Duration, Instant};

fn context() -> Arc<Context> {
    common::init_tracing();

    // Every send completes through progress.
    let mut config = Config::new();
    config.modify("EAGER_THRESHOLD", "0").unwrap();

    Context::builder()
        .enable_tag()
        .enable_wakeup()
        .config(config)
        .build(&Loopback::new())
        .unwrap()
}

fn connect(from: &Arc<Worker>, to: &Arc<Worker>) -> Arc<Endpoint> {
    let address = to.address().unwrap();
    Endpoint::new(from, &RemoteAddress::new(address.as_bytes().to_vec())).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_arm_refuses_while_work_is_pending() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    assert!(a.arm().unwrap());

    let mut send = Box::pin(endpoint.tag_send(b"queued", 1));
    let mut cx = TaskContext::from_waker(Waker::noop());
    assert!(send.as_mut().poll(&mut cx).is_pending());

    // The completion raced in after arming: arming again must refuse.
    assert!(!a.arm().unwrap());

    progress::drain(&a).unwrap();
    assert!(send.as_mut().poll(&mut cx).is_ready());
    assert!(!a.progress());
}

#[test]
fn test_event_loop_on_caller_reactor() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    let reactor = Reactor::new().unwrap();
    let channel_a = progress::register_loop(a.clone(), &reactor).unwrap();
    let channel_b = progress::register_loop(b.clone(), &reactor).unwrap();

    let receiver = b.clone();
    let received = Task::new(async move {
        let mut buffer = [0u8; 8];
        let (length, _) = receiver.tag_recv(&mut buffer, 2, TAG_MASK_FULL).await?;
        Ok::<_, Error>(buffer[..length].to_vec())
    })
    .spawn();

    let sent = Task::new({
        let endpoint = endpoint.clone();
        async move { endpoint.tag_send(b"evented", 2).await }
    })
    .spawn();

    while !(received.is_finished() && sent.is_finished()) {
        reactor.poll(Some(Duration::from_millis(100))).unwrap();
    }

    assert_eq!(received.wait().unwrap().unwrap(), b"evented");
    sent.wait().unwrap().unwrap();

    channel_a.unregister().unwrap();
    channel_b.unregister().unwrap();
    assert_eq!(reactor.channels(), 0);
}

#[test]
fn test_event_thread_stops_with_last_worker_reference() {
    let context = context();
    let worker = Worker::new(&context).unwrap();

    let progress = ProgressThread::spawn(
        worker.clone(),
        ProgressConfig::new().idle_interval(Duration::from_millis(2)),
    )
    .unwrap();

    assert!(!progress.is_finished());

    let weak = Arc::downgrade(&worker);
    drop(worker);

    wait_until(|| progress.is_finished());
    assert_eq!(progress.reactor().channels(), 0);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_busy_thread_stops_with_last_worker_reference() {
    let context = context();
    let worker = Worker::new(&context).unwrap();

    let progress =
        ProgressThread::spawn(worker.clone(), ProgressConfig::new().mode(ProgressMode::Busy))
            .unwrap();

    drop(worker);

    wait_until(|| progress.is_finished());
}

#[test]
fn test_shutdown_stops_a_thread_still_in_use() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    let progress = ProgressThread::spawn(a.clone(), ProgressConfig::new()).unwrap();

    block_on(endpoint.tag_send(b"through the thread", 4)).unwrap();

    progress.shutdown();

    // The loop released its reference on the way out.
    assert_eq!(Arc::strong_count(&a), 2);
}

#[test]
fn test_busy_poll_honors_stop_flag() {
    let context = context();
    let worker = Worker::new(&context).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let poller = {
        let worker = worker.clone();
        let stop = stop.clone();
        thread::spawn(move || progress::busy_poll(&worker, &stop))
    };

    thread::sleep(Duration::from_millis(10));
    stop.store(true, std::sync::atomic::Ordering::Release);

    poller.join().unwrap();
}
