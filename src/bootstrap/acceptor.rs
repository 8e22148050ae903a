use super::accept_on;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::net::TcpListener;
use crate::reactor::Reactor;
use crate::worker::Worker;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

/// Server side of the bootstrap handshake.
///
/// Each [`accept`](Self::accept) takes one TCP connection, reads the
/// peer's address, creates an endpoint toward it and answers with the
/// local worker's address.
pub struct Acceptor {
    worker: Arc<Worker>,
    listener: TcpListener,
}

impl Acceptor {
    pub fn new(worker: Arc<Worker>, listener: TcpListener) -> Self {
        Self { worker, listener }
    }

    /// Binds a listener on `address`, served by `reactor`.
    pub fn bind(worker: Arc<Worker>, reactor: &Reactor, address: SocketAddr) -> Result<Self> {
        Ok(Self::new(worker, TcpListener::bind(reactor, address)?))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<Arc<Endpoint>> {
        let (stream, peer) = self.listener.accept().await?;

        debug!(%peer, "bootstrap connection accepted");

        accept_on(&stream, &self.worker).await
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}
