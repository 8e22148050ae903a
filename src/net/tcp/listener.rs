use super::stream::TcpStream;
use crate::net::source::{Direction, Source};
use crate::reactor::Reactor;
use crate::reactor::poller::platform::{
    domain_of, sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tracing::debug;

const BACKLOG: libc::c_int = 128;

/// A non-blocking TCP listener driven by a [`Reactor`].
pub struct TcpListener {
    reactor: Reactor,
    source: Source,
}

impl TcpListener {
    /// Binds to `address` and starts listening.
    ///
    /// Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    pub fn bind(reactor: &Reactor, address: SocketAddr) -> io::Result<Self> {
        let domain = domain_of(&address);
        let fd = sys_socket(domain)?;

        let configured = sys_set_reuseaddr(fd)
            .and_then(|()| sys_ipv6_is_necessary(fd, domain))
            .and_then(|()| sys_bind(fd, &address))
            .and_then(|()| sys_listen(fd, BACKLOG));

        if let Err(error) = configured {
            sys_close(fd);
            return Err(error);
        }

        let listener = Self {
            reactor: reactor.clone(),
            source: Source::new(reactor, fd)?,
        };

        debug!(fd, local = ?listener.local_addr().ok(), "tcp listener bound");

        Ok(listener)
    }

    /// Accepts one connection. The stream uses the listener's reactor.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, peer) = self.source.io(Direction::Read, sys_accept).await?;

        debug!(fd, %peer, "tcp connection accepted");

        Ok((TcpStream::from_fd(&self.reactor, fd)?, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.source.fd())
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("fd", &self.source.fd())
            .finish()
    }
}
