use crate::address::RemoteAddress;
use crate::bootstrap::{BootstrapStream, read_address};
use crate::context::Features;
use crate::error::Result;
use crate::request::{Call, Kind, Request, SendLike, StreamRecv, TagRecv};
use crate::transport::{EndpointOps, Issue, RequestParam, Tag};
use crate::worker::Worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

/// A transport connection toward one remote worker.
///
/// Operations issued on an endpoint resolve independently of each other;
/// their relative completion order is not guaranteed. Closing is a one-way
/// transition: once [`close`](Self::close) has been issued, every new
/// operation and any second close fail with
/// [`Error::EndpointClosed`](crate::Error::EndpointClosed), while
/// operations issued earlier still resolve on their own.
pub struct Endpoint {
    worker: Arc<Worker>,
    ops: Arc<dyn EndpointOps>,
    closing: AtomicBool,
}

impl Endpoint {
    /// Creates an endpoint toward `peer`.
    pub fn new(worker: &Arc<Worker>, peer: &RemoteAddress) -> Result<Arc<Self>> {
        let ops = worker.ops().create_endpoint(peer.as_bytes())?;

        debug!(peer_len = peer.len(), "endpoint created");

        Ok(Arc::new(Self {
            worker: worker.clone(),
            ops,
            closing: AtomicBool::new(false),
        }))
    }

    /// Reads a framed peer address from `connection` and creates an
    /// endpoint toward it.
    pub async fn from_tcp_connection<S: BootstrapStream>(
        connection: &S,
        worker: &Arc<Worker>,
    ) -> Result<Arc<Self>> {
        let peer = read_address(connection).await?;
        Self::new(worker, &peer)
    }

    /// The worker this endpoint was created on.
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Logs the transport's description of this endpoint.
    pub fn print(&self) {
        info!(target: "ucxio::endpoint", "{}", self.ops.describe());
    }

    /// Returns `true` once a close has been issued.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Sends `buffer` on the endpoint's byte stream.
    pub fn stream_send<'a>(&'a self, buffer: &'a [u8]) -> Request<'a, SendLike> {
        self.request(
            Features::STREAM,
            Call::StreamSend {
                endpoint: self,
                buffer,
            },
        )
    }

    /// Receives from the endpoint's byte stream.
    ///
    /// Resolves with the number of bytes received, which may be less than
    /// `buffer.len()`.
    pub fn stream_recv<'a>(&'a self, buffer: &'a mut [u8]) -> Request<'a, StreamRecv> {
        self.request(
            Features::STREAM,
            Call::StreamRecv {
                endpoint: self,
                buffer,
            },
        )
    }

    /// Sends a tagged message.
    pub fn tag_send<'a>(&'a self, buffer: &'a [u8], tag: Tag) -> Request<'a, SendLike> {
        self.request(
            Features::TAG,
            Call::TagSend {
                endpoint: self,
                buffer,
                tag,
            },
        )
    }

    /// Receives a tagged message on this endpoint's worker.
    ///
    /// Tag matching is worker-wide: the message may come from any peer.
    pub fn tag_recv<'a>(
        &'a self,
        buffer: &'a mut [u8],
        tag: Tag,
        mask: Tag,
    ) -> Request<'a, TagRecv> {
        self.worker.tag_recv(buffer, tag, mask)
    }

    /// Completes once every operation issued on this endpoint completed.
    pub fn flush(&self) -> Request<'_, SendLike> {
        Request::new(&self.worker, Call::EndpointFlush { endpoint: self })
    }

    /// Closes the endpoint.
    ///
    /// Operations still in flight resolve on their own, successfully or
    /// not, whether they finish before or after the close completes.
    pub fn close(&self) -> Request<'_, SendLike> {
        Request::new(&self.worker, Call::EndpointClose { endpoint: self })
    }

    fn request<'a, K: Kind>(
        &'a self,
        feature: Features,
        call: Call<'a>,
    ) -> Request<'a, K> {
        match self.worker.context().require(feature) {
            Ok(()) => Request::new(&self.worker, call),
            Err(error) => Request::rejected(&self.worker, error),
        }
    }

    /// Claims the single close of this endpoint.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn ops(&self) -> &dyn EndpointOps {
        &*self.ops
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if !self.begin_close() {
            return;
        }

        // Nobody waits on this close: the completion carries no borrowed
        // state, so the transport may finish it whenever it progresses.
        match self.ops.close(RequestParam::detached()) {
            Issue::Failed(status) => warn!(%status, "endpoint close on drop failed"),
            _ => debug!("endpoint closed on drop"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}
