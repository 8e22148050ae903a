use super::connect_on;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::net::TcpStream;
use crate::reactor::Reactor;
use crate::worker::Worker;

use std::fmt;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use tracing::debug;

/// Client side of the bootstrap handshake.
pub struct Connector {
    worker: Arc<Worker>,
    reactor: Reactor,
    host: String,
    port: u16,
}

impl Connector {
    pub fn new(worker: Arc<Worker>, reactor: &Reactor, host: impl Into<String>, port: u16) -> Self {
        Self {
            worker,
            reactor: reactor.clone(),
            host: host.into(),
            port,
        }
    }

    /// Connects, sends the local address, then reads the peer's and
    /// creates an endpoint toward it.
    ///
    /// Host resolution blocks the calling thread. Every resolved address is
    /// tried in order.
    pub async fn connect(&self) -> Result<Arc<Endpoint>> {
        let mut last_error = None;

        for address in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect(&self.reactor, address).await {
                Ok(stream) => {
                    debug!(%address, "bootstrap connection established");
                    return connect_on(&stream, &self.worker).await;
                }
                Err(error) => {
                    debug!(%address, %error, "bootstrap connect attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
            })
            .into())
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
