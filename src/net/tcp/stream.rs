use crate::net::source::{Direction, Source};
use crate::reactor::Reactor;
use crate::reactor::poller::platform::{
    domain_of, sys_connect, sys_get_socket_error, sys_peername, sys_read, sys_send,
    sys_shutdown, sys_sockname, sys_socket,
};

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;

use tracing::debug;

/// A non-blocking TCP connection driven by a [`Reactor`].
///
/// The futures returned by [`recv`](Self::recv) and [`send`](Self::send)
/// complete once the thread running the reactor reports readiness. One
/// receive and one send may be pending at the same time.
pub struct TcpStream {
    source: Source,
}

impl TcpStream {
    pub(crate) fn from_fd(reactor: &Reactor, fd: RawFd) -> io::Result<Self> {
        Ok(Self {
            source: Source::new(reactor, fd)?,
        })
    }

    /// Connects to `address`.
    pub async fn connect(reactor: &Reactor, address: SocketAddr) -> io::Result<Self> {
        let fd = sys_socket(domain_of(&address))?;

        let stream = Self::from_fd(reactor, fd)?;

        match sys_connect(fd, &address) {
            Ok(()) => {}
            Err(error) if error.raw_os_error() == Some(libc::EINPROGRESS) => {
                stream.source.ready(Direction::Write).await?;

                if let Some(error) = sys_get_socket_error(fd)? {
                    return Err(error);
                }
            }
            Err(error) => return Err(error),
        }

        debug!(fd, %address, "tcp stream connected");

        Ok(stream)
    }

    /// Receives into `buffer`. Resolves with `0` at end of stream.
    pub async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        self.source
            .io(Direction::Read, |fd| sys_read(fd, buffer))
            .await
    }

    /// Sends from `buffer`. Resolves with the number of bytes written.
    pub async fn send(&self, buffer: &[u8]) -> io::Result<usize> {
        self.source
            .io(Direction::Write, |fd| sys_send(fd, buffer))
            .await
    }

    /// Sends the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns `WriteZero` if the socket accepts no bytes.
    pub async fn write_all(&self, mut buffer: &[u8]) -> io::Result<()> {
        while !buffer.is_empty() {
            let n = self.send(buffer).await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "send returned zero bytes",
                ));
            }

            buffer = &buffer[n..];
        }

        Ok(())
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.source.fd(), how)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.source.fd())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.source.fd())
    }
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream")
            .field("fd", &self.source.fd())
            .finish()
    }
}
