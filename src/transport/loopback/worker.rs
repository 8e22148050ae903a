use super::endpoint::LoopbackEndpoint;
use super::fabric::{decode_address, encode_address, fabric};
use crate::error::{Error, Result};
use crate::reactor::poller::platform::{
    sys_close, sys_eventfd, sys_eventfd_drain, sys_eventfd_signal,
};
use crate::transport::{
    Completion, CompletionInfo, EndpointOps, Issue, RawBufMut, RequestParam, Status, Tag,
    WorkerOps,
};

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

/// A completion waiting for the owning worker's next progress call.
pub(crate) struct Deferred {
    callback: Option<Arc<dyn Completion>>,
    status: Status,
    info: CompletionInfo,
}

impl Deferred {
    pub(crate) fn new(param: RequestParam, status: Status, info: CompletionInfo) -> Self {
        Self {
            callback: param.callback,
            status,
            info,
        }
    }
}

struct PostedRecv {
    buffer: RawBufMut,
    tag: Tag,
    mask: Tag,
    param: RequestParam,
}

struct Message {
    data: Vec<u8>,
    tag: Tag,
}

struct StreamWaiter {
    endpoint: u64,
    buffer: RawBufMut,
    param: RequestParam,
}

/// Bytes streamed by one source worker, and receives waiting for them.
#[derive(Default)]
struct StreamInbox {
    data: VecDeque<u8>,
    waiters: VecDeque<StreamWaiter>,
}

impl StreamInbox {
    /// Moves up to `buffer.len` queued bytes into `buffer`.
    fn fill(&mut self, buffer: RawBufMut) -> usize {
        let n = buffer.len.min(self.data.len());

        for (offset, byte) in self.data.drain(..n).enumerate() {
            // Safety: the receiver keeps `buffer` valid until completion.
            unsafe { buffer.ptr.add(offset).write(byte) };
        }

        n
    }
}

#[derive(Default)]
struct WorkerState {
    deferred: VecDeque<Deferred>,
    posted: Vec<PostedRecv>,
    unexpected: VecDeque<Message>,
    streams: HashMap<u64, StreamInbox>,
}

fn tag_matches(sender_tag: Tag, tag: Tag, mask: Tag) -> bool {
    sender_tag & mask == tag & mask
}

/// Copies `data` into `buffer`, truncating. Returns the status and the
/// number of bytes copied.
///
/// # Safety
///
/// `buffer` must be valid for writes of `buffer.len` bytes.
unsafe fn copy_message(data: &[u8], buffer: RawBufMut) -> (Status, usize) {
    let n = data.len().min(buffer.len);
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buffer.ptr, n) };

    if data.len() > buffer.len {
        (Status::MESSAGE_TRUNCATED, n)
    } else {
        (Status::OK, n)
    }
}

/// State of one loopback worker, shared with the fabric and endpoints.
pub(crate) struct WorkerShared {
    id: u64,
    eager_threshold: usize,
    state: Mutex<WorkerState>,

    /// Signaled whenever a completion is queued.
    available: Condvar,

    /// Set by `arm`, cleared by the first queued completion after it.
    armed: AtomicBool,

    event_fd: Option<RawFd>,
}

impl WorkerShared {
    pub(crate) fn new(eager_threshold: usize, wakeup: bool) -> Result<Arc<Self>> {
        let event_fd = if wakeup { Some(sys_eventfd()?) } else { None };

        let shared = Arc::new(Self {
            id: fabric().next_id(),
            eager_threshold,
            state: Mutex::new(WorkerState::default()),
            available: Condvar::new(),
            armed: AtomicBool::new(false),
            event_fd,
        });

        fabric().add_worker(&shared);

        debug!(id = shared.id, eager_threshold, "loopback worker created");

        Ok(shared)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Whether a send of `len` bytes completes at issue time.
    pub(crate) fn is_eager(&self, len: usize) -> bool {
        len <= self.eager_threshold
    }

    /// Queues completions for the next progress call.
    pub(crate) fn defer(&self, completions: impl IntoIterator<Item = Deferred>) {
        self.state.lock().deferred.extend(completions);
        self.signal();
    }

    fn signal(&self) {
        self.available.notify_all();

        if self.armed.swap(false, Ordering::AcqRel) {
            if let Some(fd) = self.event_fd {
                sys_eventfd_signal(fd);
            }
        }
    }

    /// Delivers a tagged message sent by a peer.
    pub(crate) fn deliver_tag(&self, data: &[u8], tag: Tag) {
        let mut state = self.state.lock();

        let position = state
            .posted
            .iter()
            .position(|posted| tag_matches(tag, posted.tag, posted.mask));

        let Some(position) = position else {
            state.unexpected.push_back(Message {
                data: data.to_vec(),
                tag,
            });
            return;
        };

        let posted = state.posted.remove(position);

        // Safety: a posted buffer stays valid until its completion fires.
        let (status, length) = unsafe { copy_message(data, posted.buffer) };

        state.deferred.push_back(Deferred::new(
            posted.param,
            status,
            CompletionInfo::Tagged {
                length,
                sender_tag: tag,
            },
        ));

        drop(state);
        self.signal();
    }

    /// Appends bytes streamed by worker `source`.
    pub(crate) fn deliver_stream(&self, source: u64, data: &[u8]) {
        let mut state = self.state.lock();
        let state = &mut *state;

        let inbox = state.streams.entry(source).or_default();
        inbox.data.extend(data);

        let mut woken = false;

        while !inbox.data.is_empty() {
            let Some(waiter) = inbox.waiters.pop_front() else {
                break;
            };

            let n = inbox.fill(waiter.buffer);
            state.deferred.push_back(Deferred::new(
                waiter.param,
                Status::OK,
                CompletionInfo::Received(n),
            ));
            woken = true;
        }

        if woken {
            self.signal();
        }
    }

    /// Receives bytes streamed by worker `source` through `endpoint`.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid until the receive completes.
    pub(crate) unsafe fn stream_recv(
        &self,
        source: u64,
        endpoint: u64,
        buffer: RawBufMut,
        param: RequestParam,
    ) -> Issue {
        let mut state = self.state.lock();
        let inbox = state.streams.entry(source).or_default();

        if buffer.len == 0 {
            return Issue::Complete(CompletionInfo::Received(0));
        }

        if !inbox.data.is_empty() && inbox.waiters.is_empty() {
            let n = inbox.fill(buffer);
            return Issue::Complete(CompletionInfo::Received(n));
        }

        inbox.waiters.push_back(StreamWaiter {
            endpoint,
            buffer,
            param,
        });

        Issue::InFlight
    }

    /// Cancels the stream receives posted through `endpoint`.
    pub(crate) fn cancel_endpoint(&self, endpoint: u64) -> Vec<Deferred> {
        let mut state = self.state.lock();
        let mut canceled = Vec::new();

        for inbox in state.streams.values_mut() {
            let (ours, others): (VecDeque<_>, VecDeque<_>) = inbox
                .waiters
                .drain(..)
                .partition(|waiter| waiter.endpoint == endpoint);

            inbox.waiters = others;
            canceled.extend(ours.into_iter().map(|waiter| {
                Deferred::new(waiter.param, Status::CANCELED, CompletionInfo::None)
            }));
        }

        canceled
    }

    /// Withdraws the receive posted with `callback`, tagged or streamed, and
    /// queues its `CANCELED` completion.
    fn cancel(&self, callback: &Arc<dyn Completion>) -> bool {
        let mut state = self.state.lock();
        let state = &mut *state;

        let posted = state
            .posted
            .iter()
            .position(|posted| posted.param.is_for(callback));

        let param = match posted {
            Some(position) => Some(state.posted.remove(position).param),
            None => state.streams.values_mut().find_map(|inbox| {
                let position = inbox
                    .waiters
                    .iter()
                    .position(|waiter| waiter.param.is_for(callback))?;
                inbox.waiters.remove(position).map(|waiter| waiter.param)
            }),
        };

        let Some(param) = param else {
            return false;
        };

        state
            .deferred
            .push_back(Deferred::new(param, Status::CANCELED, CompletionInfo::None));

        trace!(worker = self.id, "posted receive withdrawn");

        self.signal();
        true
    }
}

impl Drop for WorkerShared {
    fn drop(&mut self) {
        fabric().remove_worker(self.id);

        if let Some(fd) = self.event_fd {
            sys_close(fd);
        }

        debug!(id = self.id, "loopback worker destroyed");
    }
}

/// [`WorkerOps`] of the loopback backend.
pub(crate) struct LoopbackWorker {
    shared: Arc<WorkerShared>,
}

impl LoopbackWorker {
    pub(crate) fn new(shared: Arc<WorkerShared>) -> Self {
        Self { shared }
    }
}

impl WorkerOps for LoopbackWorker {
    fn progress(&self) -> bool {
        let ready = std::mem::take(&mut self.shared.state.lock().deferred);

        if ready.is_empty() {
            return false;
        }

        trace!(worker = self.shared.id, count = ready.len(), "firing completions");

        for deferred in ready {
            if let Some(callback) = deferred.callback {
                callback.complete(deferred.status, deferred.info);
            }
        }

        true
    }

    fn arm(&self) -> Status {
        let Some(fd) = self.shared.event_fd else {
            return Status::UNSUPPORTED;
        };

        let state = self.shared.state.lock();
        sys_eventfd_drain(fd);

        if !state.deferred.is_empty() {
            return Status::BUSY;
        }

        self.shared.armed.store(true, Ordering::Release);
        Status::OK
    }

    fn wait(&self) -> Status {
        let mut state = self.shared.state.lock();

        while state.deferred.is_empty() {
            self.shared.available.wait(&mut state);
        }

        Status::OK
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.shared.event_fd
    }

    fn get_address(&self) -> Result<Box<[u8]>> {
        Ok(encode_address(self.shared.id))
    }

    fn release_address(&self, address: Box<[u8]>) {
        drop(address);
    }

    fn create_endpoint(&self, remote: &[u8]) -> Result<Arc<dyn EndpointOps>> {
        let peer_id = decode_address(remote).ok_or(Error::InvalidAddress(remote.len()))?;

        let peer = fabric().worker(peer_id).ok_or_else(|| {
            Error::transport(Status::UNREACHABLE, "failed to create endpoint")
        })?;

        Ok(Arc::new(LoopbackEndpoint::new(self.shared.clone(), &peer)))
    }

    unsafe fn tag_recv(&self, buffer: RawBufMut, tag: Tag, mask: Tag, param: RequestParam) -> Issue {
        let mut state = self.shared.state.lock();

        let message = state
            .unexpected
            .iter()
            .position(|message| tag_matches(message.tag, tag, mask))
            .and_then(|position| state.unexpected.remove(position));

        let Some(message) = message else {
            state.posted.push(PostedRecv {
                buffer,
                tag,
                mask,
                param,
            });
            return Issue::InFlight;
        };

        drop(state);

        // Safety: the caller keeps `buffer` valid for this call.
        match unsafe { copy_message(&message.data, buffer) } {
            (Status::OK, length) => Issue::Complete(CompletionInfo::Tagged {
                length,
                sender_tag: message.tag,
            }),
            (status, _) => Issue::Failed(status),
        }
    }

    fn flush(&self, param: RequestParam) -> Issue {
        // Queued behind every completion already pending.
        self.shared
            .defer([Deferred::new(param, Status::OK, CompletionInfo::None)]);
        Issue::InFlight
    }

    fn cancel(&self, callback: &Arc<dyn Completion>) -> bool {
        self.shared.cancel(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_matching_honors_mask() {
        assert!(tag_matches(0xAB, 0xAB, u64::MAX));
        assert!(!tag_matches(0xAB, 0xAC, u64::MAX));
        assert!(tag_matches(0x1_00FF, 0x2_00FF, 0xFFFF));
    }

    #[test]
    fn test_arm_reports_busy_while_completions_are_queued() {
        let shared = WorkerShared::new(64, true).unwrap();
        let worker = LoopbackWorker::new(shared.clone());

        assert_eq!(worker.arm(), Status::OK);

        shared.defer([Deferred::new(RequestParam::detached(), Status::OK, CompletionInfo::None)]);
        assert!(sys_eventfd_drain(shared.event_fd.unwrap()));
        assert_eq!(worker.arm(), Status::BUSY);

        assert!(worker.progress());
        assert!(!worker.progress());
        assert_eq!(worker.arm(), Status::OK);
    }
}
