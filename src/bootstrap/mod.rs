//! Address exchange over an out-of-band byte stream.
//!
//! Before two workers can talk, each needs the other's transport address.
//! Peers swap them over TCP, framed as `[u64 big-endian length][bytes]`:
//! - the accepting side reads the peer's address, creates the endpoint,
//!   then sends its own address,
//! - the connecting side sends first, then reads.
//!
//! The framing works over any [`BootstrapStream`]. There is no magic,
//! version or length bound on the frame.

mod acceptor;
mod connector;
mod wire;

pub use acceptor::Acceptor;
pub use connector::Connector;
pub use wire::{HEADER_LEN, encode_address, read_address, write_address};

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::net::TcpStream;
use crate::worker::Worker;

use std::future::Future;
use std::io;
use std::sync::Arc;

use tracing::debug;

/// A byte stream the handshake can run over.
pub trait BootstrapStream: Sync {
    /// Receives into `buffer`; `Ok(0)` means the peer closed the stream.
    fn recv<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    /// Sends from `buffer`, returning how many bytes were taken.
    fn send<'a>(&'a self, buffer: &'a [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a;
}

impl BootstrapStream for TcpStream {
    fn recv<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        TcpStream::recv(self, buffer)
    }

    fn send<'a>(&'a self, buffer: &'a [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        TcpStream::send(self, buffer)
    }
}

/// Accepting half of the handshake over an established stream.
pub async fn accept_on<S: BootstrapStream>(stream: &S, worker: &Arc<Worker>) -> Result<Arc<Endpoint>> {
    let endpoint = Endpoint::from_tcp_connection(stream, worker).await?;
    worker.address()?.send_to(stream).await?;

    debug!("bootstrap accepted peer");

    Ok(endpoint)
}

/// Connecting half of the handshake over an established stream.
pub async fn connect_on<S: BootstrapStream>(stream: &S, worker: &Arc<Worker>) -> Result<Arc<Endpoint>> {
    worker.address()?.send_to(stream).await?;
    let endpoint = Endpoint::from_tcp_connection(stream, worker).await?;

    debug!("bootstrap connected to peer");

    Ok(endpoint)
}
