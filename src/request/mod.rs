//! Request adapter.
//!
//! A [`Request`] turns one non-blocking transport call into a future. The
//! call is issued on the first poll, not when the request is built,
//! because it may complete synchronously before any waker exists:
//!
//! - immediate success or failure resolves inline, without suspending;
//! - an in-flight call suspends on the operation's resumption slot until
//!   the transport's completion fires, possibly on another thread.
//!
//! Buffers are borrowed for the lifetime of the request. Dropping a request
//! whose call is still in flight withdraws it if it is a receive nothing
//! matched yet, then drives the worker until the transport releases the
//! buffer.

mod kind;
mod operation;

pub use kind::{Fetch, Kind, SendLike, StreamRecv, TagRecv};

pub(crate) use operation::{Operation, Outcome};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport::{
    AtomicRequest, Completion, Issue, RawBuf, RawBufMut, RemoteKeyOps, RequestParam, Tag,
};
use crate::worker::Worker;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, trace};

/// A transport call waiting to be issued.
pub(crate) enum Call<'a> {
    StreamSend {
        endpoint: &'a Endpoint,
        buffer: &'a [u8],
    },
    StreamRecv {
        endpoint: &'a Endpoint,
        buffer: &'a mut [u8],
    },
    TagSend {
        endpoint: &'a Endpoint,
        buffer: &'a [u8],
        tag: Tag,
    },
    TagRecv {
        worker: &'a Worker,
        buffer: &'a mut [u8],
        tag: Tag,
        mask: Tag,
    },
    Put {
        endpoint: &'a Endpoint,
        buffer: &'a [u8],
        remote_addr: u64,
        rkey: &'a dyn RemoteKeyOps,
    },
    Get {
        endpoint: &'a Endpoint,
        buffer: &'a mut [u8],
        remote_addr: u64,
        rkey: &'a dyn RemoteKeyOps,
    },
    Atomic {
        endpoint: &'a Endpoint,
        request: AtomicRequest,
        rkey: &'a dyn RemoteKeyOps,
    },
    EndpointFlush {
        endpoint: &'a Endpoint,
    },
    EndpointClose {
        endpoint: &'a Endpoint,
    },
    WorkerFlush {
        worker: &'a Worker,
    },
    /// Refused before reaching the transport.
    Rejected(Error),
}

/// What issuing a call produced.
enum Issued {
    Resolved(Result<Outcome>),
    Pending,
}

impl Call<'_> {
    /// Error context reported when the transport fails the call.
    fn context(&self) -> &'static str {
        match self {
            Call::StreamSend { .. } => "stream send failed",
            Call::StreamRecv { .. } => "stream receive failed",
            Call::TagSend { .. } => "tag send failed",
            Call::TagRecv { .. } => "tag receive failed",
            Call::Put { .. } => "remote put failed",
            Call::Get { .. } => "remote get failed",
            Call::Atomic { .. } => "remote atomic failed",
            Call::EndpointFlush { .. } => "endpoint flush failed",
            Call::EndpointClose { .. } => "endpoint close failed",
            Call::WorkerFlush { .. } => "worker flush failed",
            Call::Rejected(_) => "request rejected",
        }
    }

    /// Endpoint the call targets, if any.
    fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Call::StreamSend { endpoint, .. }
            | Call::StreamRecv { endpoint, .. }
            | Call::TagSend { endpoint, .. }
            | Call::Put { endpoint, .. }
            | Call::Get { endpoint, .. }
            | Call::Atomic { endpoint, .. }
            | Call::EndpointFlush { endpoint }
            | Call::EndpointClose { endpoint } => Some(endpoint),
            _ => None,
        }
    }

    /// Issues the call with `operation` as its completion handle.
    ///
    /// This is the single place where requests cross into the transport.
    fn issue(self, operation: &Arc<Operation>) -> Issued {
        if let Some(endpoint) = self.endpoint() {
            let closing = matches!(self, Call::EndpointClose { .. });

            if closing {
                if !endpoint.begin_close() {
                    return Issued::Resolved(Err(Error::EndpointClosed));
                }
            } else if endpoint.is_closing() {
                return Issued::Resolved(Err(Error::EndpointClosed));
            }
        }

        let param = RequestParam::new(operation.clone());

        // Safety: every buffer is borrowed by the owning `Request` for `'a`,
        // and `Request` does not release the borrow before the call resolved.
        let issue = unsafe {
            match self {
                Call::StreamSend { endpoint, buffer } => endpoint
                    .ops()
                    .stream_send(RawBuf::from_slice(buffer), param),
                Call::StreamRecv { endpoint, buffer } => endpoint
                    .ops()
                    .stream_recv(RawBufMut::from_slice(buffer), param),
                Call::TagSend {
                    endpoint,
                    buffer,
                    tag,
                } => endpoint
                    .ops()
                    .tag_send(RawBuf::from_slice(buffer), tag, param),
                Call::TagRecv {
                    worker,
                    buffer,
                    tag,
                    mask,
                } => worker
                    .ops()
                    .tag_recv(RawBufMut::from_slice(buffer), tag, mask, param),
                Call::Put {
                    endpoint,
                    buffer,
                    remote_addr,
                    rkey,
                } => endpoint
                    .ops()
                    .put(RawBuf::from_slice(buffer), remote_addr, rkey, param),
                Call::Get {
                    endpoint,
                    buffer,
                    remote_addr,
                    rkey,
                } => endpoint
                    .ops()
                    .get(RawBufMut::from_slice(buffer), remote_addr, rkey, param),
                Call::Atomic {
                    endpoint,
                    request,
                    rkey,
                } => endpoint.ops().atomic(request, rkey, param),
                Call::EndpointFlush { endpoint } => endpoint.ops().flush(param),
                Call::EndpointClose { endpoint } => endpoint.ops().close(param),
                Call::WorkerFlush { worker } => worker.ops().flush(param),
                Call::Rejected(error) => return Issued::Resolved(Err(error)),
            }
        };

        match issue {
            Issue::Complete(info) => Issued::Resolved(Ok(Ok(info))),
            Issue::Failed(status) => Issued::Resolved(Ok(Err(status))),
            Issue::InFlight => Issued::Pending,
        }
    }
}

/// Future of one transport operation.
///
/// Created by the operation methods of [`Worker`](crate::Worker),
/// [`Endpoint`](crate::Endpoint) and
/// [`RemoteMemoryHandle`](crate::RemoteMemoryHandle). Nothing reaches the
/// transport until the request is first polled.
#[must_use = "requests do nothing unless polled"]
pub struct Request<'a, K: Kind> {
    call: Option<Call<'a>>,
    context: &'static str,

    /// Shared with the transport while the call is in flight.
    operation: Option<Arc<Operation>>,

    /// Worker progressed when the request is dropped mid-flight.
    worker: &'a Worker,

    kind: PhantomData<fn() -> K>,
}

impl<'a, K: Kind> Request<'a, K> {
    pub(crate) fn new(worker: &'a Worker, call: Call<'a>) -> Self {
        Self {
            context: call.context(),
            call: Some(call),
            operation: None,
            worker,
            kind: PhantomData,
        }
    }

    pub(crate) fn rejected(worker: &'a Worker, error: Error) -> Self {
        Self::new(worker, Call::Rejected(error))
    }

    fn finish(&self, outcome: Result<Outcome>) -> Result<K::Output> {
        match outcome? {
            Ok(info) => {
                trace!(op = self.context, ?info, "request completed");
                Ok(K::finish(info))
            }
            Err(status) => Err(Error::transport(status, self.context)),
        }
    }
}

impl<K: Kind> Future for Request<'_, K> {
    type Output = Result<K::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(call) = this.call.take() {
            let operation = Operation::new();

            match call.issue(&operation) {
                Issued::Resolved(outcome) => return Poll::Ready(this.finish(outcome)),
                Issued::Pending => this.operation = Some(operation),
            }
        }

        let operation = this
            .operation
            .as_ref()
            .expect("request polled after completion");

        match operation.poll_complete(cx) {
            Poll::Ready(outcome) => {
                this.operation = None;
                Poll::Ready(this.finish(Ok(outcome)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<K: Kind> Drop for Request<'_, K> {
    fn drop(&mut self) {
        let Some(operation) = self.operation.take() else {
            return;
        };

        if operation.is_complete() {
            return;
        }

        debug!(op = self.context, "request dropped in flight, draining worker");

        // Unmatched receives are withdrawn; the drain then only waits for
        // their CANCELED completion.
        let handle: Arc<dyn Completion> = operation.clone();
        self.worker.ops().cancel(&handle);
        drop(handle);

        while !operation.is_complete() {
            if !self.worker.progress() {
                std::thread::yield_now();
            }
        }
    }
}
