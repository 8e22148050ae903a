mod common;

use ucxio::bootstrap::{
    Acceptor, BootstrapStream, Connector, HEADER_LEN, accept_on, connect_on, encode_address,
    read_address, write_address,
};
use ucxio::progress::{ProgressConfig, ProgressThread};
use ucxio::transport::TAG_MASK_FULL;
use ucxio::transport::loopback::Loopback;
use ucxio::{Config, Context, Error, Task, Worker, block_on};

use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::Arc;

/// In-memory stream: reads drain `inbound`, writes append to `outbound`,
/// at most `chunk` bytes per call. An empty inbound reads as closed.
struct MemoryStream {
    inbound: Mutex<VecDeque<u8>>,
    outbound: Mutex<Vec<u8>>,
    chunk: usize,
}

impl MemoryStream {
    fn new(inbound: &[u8], chunk: usize) -> Self {
        Self {
            inbound: Mutex::new(inbound.iter().copied().collect()),
            outbound: Mutex::new(Vec::new()),
            chunk,
        }
    }

    fn written(&self) -> Vec<u8> {
        self.outbound.lock().clone()
    }
}

impl BootstrapStream for MemoryStream {
    fn recv<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        async move {
            let mut inbound = self.inbound.lock();
            let n = buffer.len().min(self.chunk).min(inbound.len());

            for (slot, byte) in buffer.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }

            Ok(n)
        }
    }

    fn send<'a>(&'a self, buffer: &'a [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        async move {
            let n = buffer.len().min(self.chunk);
            self.outbound.lock().extend_from_slice(&buffer[..n]);
            Ok(n)
        }
    }
}

fn context(wakeup: bool) -> Arc<Context> {
    common::init_tracing();

    let builder = Context::builder().enable_tag().config(Config::new());
    let builder = if wakeup { builder.enable_wakeup() } else { builder };

    builder.build(&Loopback::new()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_framed_address_survives_the_wire(
        blob in prop::collection::vec(any::<u8>(), 0..=65536),
        chunk in 1usize..4096,
    ) {
        let writer = MemoryStream::new(&[], chunk);
        block_on(write_address(&writer, &blob)).unwrap();

        let frame = writer.written();
        prop_assert_eq!(frame.len(), HEADER_LEN + blob.len());
        prop_assert_eq!(&frame, &encode_address(&blob));

        let reader = MemoryStream::new(&frame, chunk);
        let address = block_on(read_address(&reader)).unwrap();
        prop_assert_eq!(address.as_bytes(), &blob[..]);
    }
}

#[test]
fn test_length_prefix_is_big_endian() {
    let frame = encode_address(&[0xAA; 3]);

    assert_eq!(&frame[..HEADER_LEN], &[0, 0, 0, 0, 0, 0, 0, 3]);
    assert_eq!(&frame[HEADER_LEN..], &[0xAA; 3]);
}

#[test]
fn test_one_byte_fragments_are_reassembled() {
    let frame = encode_address(b"fragmented address");
    let reader = MemoryStream::new(&frame, 1);

    let address = block_on(read_address(&reader)).unwrap();
    assert_eq!(address.as_bytes(), b"fragmented address");
}

#[test]
fn test_closed_stream_fails_the_handshake() {
    let empty = MemoryStream::new(&[], 64);
    assert!(matches!(
        block_on(read_address(&empty)),
        Err(Error::Bootstrap("failed to read address length"))
    ));

    let mut frame = encode_address(b"cut short");
    frame.truncate(HEADER_LEN + 3);
    let truncated = MemoryStream::new(&frame, 64);
    assert!(matches!(
        block_on(read_address(&truncated)),
        Err(Error::Bootstrap("failed to read address"))
    ));

    let stalled = MemoryStream::new(&[], 0);
    assert!(matches!(
        block_on(write_address(&stalled, b"x")),
        Err(Error::Bootstrap("failed to write address"))
    ));
}

#[test]
fn test_handshake_exchanges_addresses_in_both_orders() {
    let context = context(false);
    let server = Worker::new(&context).unwrap();
    let client = Worker::new(&context).unwrap();

    let server_frame = server.address().unwrap().serialize();
    let client_frame = client.address().unwrap().serialize();

    // The connector writes first, then reads what the acceptor answered.
    let client_side = MemoryStream::new(&server_frame, 7);
    block_on(connect_on(&client_side, &client)).unwrap();
    assert_eq!(client_side.written(), client_frame);

    // The acceptor reads first, then answers with its own address.
    let server_side = MemoryStream::new(&client_side.written(), 7);
    block_on(accept_on(&server_side, &server)).unwrap();
    assert_eq!(server_side.written(), server_frame);
}

#[test]
fn test_tcp_bootstrap_connects_two_workers() {
    let context = context(true);
    let server = Worker::new(&context).unwrap();
    let client = Worker::new(&context).unwrap();

    let server_progress = ProgressThread::spawn(server.clone(), ProgressConfig::new()).unwrap();
    let client_progress = ProgressThread::spawn(client.clone(), ProgressConfig::new()).unwrap();

    let acceptor = Acceptor::bind(
        server.clone(),
        server_progress.reactor(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .unwrap();
    let port = acceptor.local_addr().unwrap().port();

    let accepted = Task::new(async move { acceptor.accept().await }).spawn();

    let connector = Connector::new(client.clone(), client_progress.reactor(), "127.0.0.1", port);
    let client_endpoint = block_on(connector.connect()).unwrap();
    let server_endpoint = accepted.wait().unwrap().unwrap();

    // Post the receive first so the completion travels through the
    // server's event descriptor.
    let receiver = server.clone();
    let received = Task::new(async move {
        let mut buffer = [0u8; 32];
        let (length, _) = receiver.tag_recv(&mut buffer, 5, TAG_MASK_FULL).await?;
        Ok::<_, Error>(buffer[..length].to_vec())
    })
    .spawn();

    block_on(client_endpoint.tag_send(b"over tcp", 5)).unwrap();
    assert_eq!(received.wait().unwrap().unwrap(), b"over tcp");

    // And back, over the endpoint the acceptor created.
    block_on(server_endpoint.tag_send(b"reply", 6)).unwrap();
    let mut buffer = [0u8; 8];
    let (length, tag) = block_on(client.tag_recv(&mut buffer, 6, TAG_MASK_FULL)).unwrap();
    assert_eq!((&buffer[..length], tag), (&b"reply"[..], 6));
}
