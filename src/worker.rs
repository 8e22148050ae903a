use crate::address::LocalAddress;
use crate::context::{Context, Features};
use crate::error::{Error, Result, check};
use crate::request::{Call, Request, SendLike, TagRecv};
use crate::transport::{Status, Tag, ThreadMode, WorkerOps};

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

use tracing::debug;

/// A transport worker.
///
/// The worker owns the progress engine: completions of every operation
/// issued through it or its endpoints fire from [`progress`](Self::progress).
/// Workers are shared through `Arc`; endpoints, local addresses and
/// progress loops each hold a reference.
pub struct Worker {
    ops: Arc<dyn WorkerOps>,
    context: Arc<Context>,
    event_fd: Option<RawFd>,
}

impl Worker {
    /// Creates a worker on `context`.
    ///
    /// The worker is multi-threaded when the context was built with
    /// `enable_mt`, single-threaded otherwise.
    pub fn new(context: &Arc<Context>) -> Result<Arc<Self>> {
        let mode = if context.is_multi_threaded() {
            ThreadMode::Multi
        } else {
            ThreadMode::Single
        };

        let ops = context.ops().create_worker(mode)?;

        let event_fd = if context.features().contains(Features::WAKEUP) {
            let fd = ops.event_fd().ok_or_else(|| {
                Error::transport(Status::UNSUPPORTED, "failed to get worker event fd")
            })?;
            Some(fd)
        } else {
            None
        };

        debug!(?mode, ?event_fd, "worker created");

        Ok(Arc::new(Self {
            ops,
            context: context.clone(),
            event_fd,
        }))
    }

    /// Event descriptor raised on activity once the worker is armed.
    ///
    /// Requires the `WAKEUP` feature.
    pub fn event_fd(&self) -> Result<RawFd> {
        self.event_fd.ok_or(Error::FeatureDisabled(Features::WAKEUP))
    }

    /// The context this worker was created on.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Acquires the worker's transport address.
    pub fn address(self: &Arc<Self>) -> Result<LocalAddress> {
        let bytes = self.ops.get_address()?;
        Ok(LocalAddress::new(self.clone(), bytes))
    }

    /// Progresses the worker.
    ///
    /// Returns `true` if any completion fired.
    pub fn progress(&self) -> bool {
        self.ops.progress()
    }

    /// Blocks until the worker has an event to progress.
    ///
    /// Should only be called after [`progress`](Self::progress) returned
    /// `false`.
    pub fn wait(&self) -> Result<()> {
        check(self.ops.wait(), "failed to wait worker")
    }

    /// Arms the worker for the next event notification.
    ///
    /// Returns `false` when new work raced in since the last drain; the
    /// caller must progress again before re-arming.
    pub fn arm(&self) -> Result<bool> {
        match self.ops.arm() {
            Status::BUSY => Ok(false),
            status => check(status, "failed to arm worker").map(|_| true),
        }
    }

    /// Completes once every operation issued on this worker completed.
    pub fn flush(&self) -> Request<'_, SendLike> {
        Request::new(self, Call::WorkerFlush { worker: self })
    }

    /// Receives a tagged message matching `(sender_tag & mask) == (tag & mask)`.
    ///
    /// Resolves with the received length and the sender's tag. Use
    /// [`TAG_MASK_FULL`](crate::transport::TAG_MASK_FULL) for exact matching.
    pub fn tag_recv<'a>(
        &'a self,
        buffer: &'a mut [u8],
        tag: Tag,
        mask: Tag,
    ) -> Request<'a, TagRecv> {
        if let Err(error) = self.context.require(Features::TAG) {
            return Request::rejected(self, error);
        }

        Request::new(
            self,
            Call::TagRecv {
                worker: self,
                buffer,
                tag,
                mask,
            },
        )
    }

    pub(crate) fn ops(&self) -> &dyn WorkerOps {
        &*self.ops
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("features", &self.context.features())
            .field("event_fd", &self.event_fd)
            .finish()
    }
}
