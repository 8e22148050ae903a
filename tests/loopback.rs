mod common;

use ucxio::progress::{ProgressConfig, ProgressMode, ProgressThread};
use ucxio::transport::loopback::Loopback;
use ucxio::transport::{Status, TAG_MASK_FULL};
use ucxio::{
    Config, Context, Endpoint, Error, LocalMemoryHandle, RemoteAddress, RemoteMemoryHandle, Task,
    Worker, block_on,
};

use std::future::Future;
use std::sync::{Arc, mpsc};
use std::task::{Context as TaskContext, Waker};
use std::thread;
use std::time::Duration;

fn context_with(config: Config) -> Arc<Context> {
    common::init_tracing();

    Context::builder()
        .enable_tag()
        .enable_stream()
        .enable_rma()
        .enable_amo32()
        .enable_amo64()
        .config(config)
        .build(&Loopback::new())
        .unwrap()
}

fn context() -> Arc<Context> {
    context_with(Config::new())
}

fn connect(from: &Arc<Worker>, to: &Arc<Worker>) -> Arc<Endpoint> {
    let address = to.address().unwrap();
    Endpoint::new(from, &RemoteAddress::new(address.as_bytes().to_vec())).unwrap()
}

fn busy(worker: &Arc<Worker>) -> ProgressThread {
    ProgressThread::spawn(worker.clone(), ProgressConfig::new().mode(ProgressMode::Busy)).unwrap()
}

#[test]
fn test_tag_message_completes_posted_receive() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let _progress_a = busy(&a);
    let _progress_b = busy(&b);

    let endpoint = connect(&a, &b);

    let receiver = b.clone();
    let received = Task::new(async move {
        let mut buffer = [0u8; 16];
        let (length, tag) = receiver.tag_recv(&mut buffer, 0x42, TAG_MASK_FULL).await?;
        Ok::<_, Error>((buffer[..length].to_vec(), tag))
    })
    .spawn();

    block_on(endpoint.tag_send(b"hello", 0x42)).unwrap();

    let (data, tag) = received.wait().unwrap().unwrap();
    assert_eq!(data, b"hello");
    assert_eq!(tag, 0x42);
}

#[test]
fn test_unexpected_tag_message_is_matched_later() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    // Small sends complete at issue time: no progress needed.
    block_on(endpoint.tag_send(b"first", 0x1_0001)).unwrap();
    block_on(endpoint.tag_send(b"second", 0x2_0002)).unwrap();

    let mut buffer = [0u8; 16];
    let (length, tag) = block_on(b.tag_recv(&mut buffer, 0x2_0000, 0xF_0000)).unwrap();

    assert_eq!(&buffer[..length], b"second");
    assert_eq!(tag, 0x2_0002);
}

#[test]
fn test_truncated_tag_receive_fails() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    block_on(endpoint.tag_send(b"too long", 9)).unwrap();

    let mut buffer = [0u8; 4];
    let error = block_on(b.tag_recv(&mut buffer, 9, TAG_MASK_FULL)).unwrap_err();

    assert_eq!(error.status(), Some(Status::MESSAGE_TRUNCATED));
}

#[test]
fn test_stream_above_eager_threshold_completes_through_progress() {
    let mut config = Config::new();
    config.modify("EAGER_THRESHOLD", "16").unwrap();

    let context = context_with(config);
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let _progress_a = busy(&a);

    let forward = connect(&a, &b);
    let backward = connect(&b, &a);

    let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    block_on(forward.stream_send(&payload)).unwrap();

    let mut received = Vec::new();
    let mut chunk = [0u8; 300];

    while received.len() < payload.len() {
        let n = block_on(backward.stream_recv(&mut chunk)).unwrap();
        received.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(received, payload);
}

#[test]
fn test_remote_memory_put_get_and_atomics() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let _progress_a = busy(&a);

    let memory = LocalMemoryHandle::allocate(&context, 64).unwrap();
    let rkey = memory.pack_rkey().unwrap();
    let base = memory.remote_addr();

    let endpoint = connect(&a, &b);
    let remote = RemoteMemoryHandle::new(&endpoint, rkey.as_bytes()).unwrap();

    block_on(remote.put(b"remote bytes", base + 16)).unwrap();

    let mut readback = [0u8; 12];
    block_on(remote.get(&mut readback, base + 16)).unwrap();
    assert_eq!(&readback, b"remote bytes");

    assert_eq!(block_on(remote.atomic_fetch_add(base, 5u64)).unwrap(), 0);
    block_on(remote.atomic_add(base, 2u64)).unwrap();
    assert_eq!(block_on(remote.atomic_swap(base, 100u64)).unwrap(), 7);

    // Failed comparison reports the current value and leaves it alone.
    assert_eq!(block_on(remote.atomic_compare_swap(base, 1u64, 9)).unwrap(), 100);
    assert_eq!(block_on(remote.atomic_compare_swap(base, 100u64, 9)).unwrap(), 100);
    assert_eq!(block_on(remote.atomic_fetch_or(base, 0u64)).unwrap(), 9);

    block_on(remote.atomic_or(base + 8, 0b1010u32)).unwrap();
    assert_eq!(block_on(remote.atomic_fetch_xor(base + 8, 0b0011u32)).unwrap(), 0b1010);
    assert_eq!(block_on(remote.atomic_fetch_and(base + 8, 0b0110u32)).unwrap(), 0b1001);
    assert_eq!(block_on(remote.atomic_fetch_add(base + 8, -1i32)).unwrap(), 0);
}

#[test]
fn test_out_of_range_put_fails_with_invalid_address() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();

    let memory = LocalMemoryHandle::allocate(&context, 8).unwrap();
    let rkey = memory.pack_rkey().unwrap();

    let endpoint = connect(&a, &b);
    let remote = RemoteMemoryHandle::new(&endpoint, rkey.as_bytes()).unwrap();

    let error = block_on(remote.put(&[0u8; 16], memory.remote_addr())).unwrap_err();
    assert_eq!(error.status(), Some(Status::INVALID_ADDR));
}

#[test]
fn test_disabled_feature_rejects_before_issuing() {
    let context = Context::builder()
        .enable_tag()
        .config(Config::new())
        .build(&Loopback::new())
        .unwrap();

    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    let error = block_on(endpoint.stream_send(b"nope")).unwrap_err();
    assert!(matches!(error, Error::FeatureDisabled(_)));

    let memory = LocalMemoryHandle::allocate(&context, 8).unwrap();
    let rkey = memory.pack_rkey().unwrap();
    let remote = RemoteMemoryHandle::new(&endpoint, rkey.as_bytes()).unwrap();

    let error = block_on(remote.atomic_fetch_add(memory.remote_addr(), 1u64)).unwrap_err();
    assert!(matches!(error, Error::FeatureDisabled(_)));

    assert!(matches!(a.event_fd(), Err(Error::FeatureDisabled(_))));
}

#[test]
fn test_close_resolves_pending_receives() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let _progress_a = busy(&a);

    let endpoint = connect(&a, &b);

    let pending: Vec<_> = (0..2)
        .map(|_| {
            let endpoint = endpoint.clone();
            Task::new(async move {
                let mut buffer = [0u8; 8];
                endpoint.stream_recv(&mut buffer).await
            })
            .spawn()
        })
        .collect();

    block_on(endpoint.close()).unwrap();
    assert!(endpoint.is_closing());

    for receive in pending {
        let error = receive.wait().unwrap().unwrap_err();
        assert_eq!(error.status(), Some(Status::CANCELED));
    }

    assert!(matches!(
        block_on(endpoint.stream_send(b"late")),
        Err(Error::EndpointClosed)
    ));
    assert!(matches!(block_on(endpoint.close()), Err(Error::EndpointClosed)));
}

#[test]
fn test_dropping_in_flight_request_waits_for_its_buffer() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    let mut buffer = [0u8; 8];

    {
        let mut request = Box::pin(b.tag_recv(&mut buffer, 3, TAG_MASK_FULL));
        let mut cx = TaskContext::from_waker(Waker::noop());

        assert!(request.as_mut().poll(&mut cx).is_pending());

        block_on(endpoint.tag_send(b"late", 3)).unwrap();

        // The message is already in the buffer; dropping progresses `b`
        // until the transport reports it.
        drop(request);
    }

    assert_eq!(&buffer[..4], b"late");
    assert!(!b.progress());
}

#[test]
fn test_dropping_unmatched_tag_receive_withdraws_it() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let endpoint = connect(&a, &b);

    let (done, dropped) = mpsc::channel();
    let receiver = b.clone();

    thread::spawn(move || {
        let mut buffer = [0u8; 8];
        let mut request = Box::pin(receiver.tag_recv(&mut buffer, 7, TAG_MASK_FULL));
        let mut cx = TaskContext::from_waker(Waker::noop());

        assert!(request.as_mut().poll(&mut cx).is_pending());
        drop(request);

        done.send(()).unwrap();
    });

    dropped.recv_timeout(Duration::from_secs(5)).unwrap();

    // Nothing is posted anymore: the message waits for the next receive.
    block_on(endpoint.tag_send(b"after", 7)).unwrap();

    let mut buffer = [0u8; 8];
    let (length, _) = block_on(b.tag_recv(&mut buffer, 7, TAG_MASK_FULL)).unwrap();

    assert_eq!(&buffer[..length], b"after");
    assert!(!b.progress());
}

#[test]
fn test_dropping_pending_stream_receive_withdraws_it() {
    let context = context();
    let a = Worker::new(&context).unwrap();
    let b = Worker::new(&context).unwrap();
    let forward = connect(&a, &b);
    let back = connect(&b, &a);

    let (done, dropped) = mpsc::channel();
    let receiver = back.clone();

    thread::spawn(move || {
        let mut buffer = [0u8; 8];
        let mut request = Box::pin(receiver.stream_recv(&mut buffer));
        let mut cx = TaskContext::from_waker(Waker::noop());

        assert!(request.as_mut().poll(&mut cx).is_pending());
        drop(request);

        done.send(()).unwrap();
    });

    dropped.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!back.is_closing());

    block_on(forward.stream_send(b"stream")).unwrap();

    let mut buffer = [0u8; 8];
    let length = block_on(back.stream_recv(&mut buffer)).unwrap();

    assert_eq!(&buffer[..length], b"stream");
}

#[test]
fn test_unknown_address_is_rejected() {
    let context = context();
    let a = Worker::new(&context).unwrap();

    let garbage = RemoteAddress::new(vec![1, 2, 3]);
    assert!(matches!(
        Endpoint::new(&a, &garbage),
        Err(Error::InvalidAddress(3))
    ));

    let gone = {
        let b = Worker::new(&context).unwrap();
        let address = b.address().unwrap();
        address.as_bytes().to_vec()
    };

    let error = Endpoint::new(&a, &RemoteAddress::new(gone)).unwrap_err();
    assert_eq!(error.status(), Some(Status::UNREACHABLE));
}
