use super::fabric::fabric;
use super::memory::LoopbackRkey;
use super::worker::{Deferred, WorkerShared};
use crate::error::Result;
use crate::transport::{
    AtomicRequest, CompletionInfo, EndpointOps, Issue, RawBuf, RawBufMut, RemoteKeyOps,
    RequestParam, Status, Tag,
};

use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

/// [`EndpointOps`] of the loopback backend.
///
/// Data moves at issue time: sends copy straight into the peer's queues
/// and RMA touches the target region directly. Only the completions are
/// deferred to the local worker's progress, except for sends no larger
/// than the eager threshold, which complete on the spot.
pub(crate) struct LoopbackEndpoint {
    id: u64,
    local: Arc<WorkerShared>,
    peer: Weak<WorkerShared>,
    peer_id: u64,
    closed: AtomicBool,
}

impl LoopbackEndpoint {
    pub(crate) fn new(local: Arc<WorkerShared>, peer: &Arc<WorkerShared>) -> Self {
        Self {
            id: fabric().next_id(),
            local,
            peer: Arc::downgrade(peer),
            peer_id: peer.id(),
            closed: AtomicBool::new(false),
        }
    }

    fn peer(&self) -> std::result::Result<Arc<WorkerShared>, Status> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Status::NOT_CONNECTED);
        }

        self.peer.upgrade().ok_or(Status::CONNECTION_RESET)
    }

    /// Completes a send of `len` bytes, eagerly or at the next progress.
    fn finish_send(&self, len: usize, param: RequestParam) -> Issue {
        if self.local.is_eager(len) {
            return Issue::Complete(CompletionInfo::None);
        }

        self.deferred(param, CompletionInfo::None)
    }

    fn deferred(&self, param: RequestParam, info: CompletionInfo) -> Issue {
        self.local.defer([Deferred::new(param, Status::OK, info)]);
        Issue::InFlight
    }
}

/// # Safety
///
/// `buffer` must be valid for reads of `buffer.len` bytes.
unsafe fn as_slice<'a>(buffer: RawBuf) -> &'a [u8] {
    if buffer.len == 0 {
        return &[];
    }

    unsafe { slice::from_raw_parts(buffer.ptr, buffer.len) }
}

impl EndpointOps for LoopbackEndpoint {
    unsafe fn stream_send(&self, buffer: RawBuf, param: RequestParam) -> Issue {
        let peer = match self.peer() {
            Ok(peer) => peer,
            Err(status) => return Issue::Failed(status),
        };

        // Safety: the caller keeps `buffer` valid for this call.
        let data = unsafe { as_slice(buffer) };
        peer.deliver_stream(self.local.id(), data);

        trace!(endpoint = self.id, len = data.len(), "stream send");

        self.finish_send(buffer.len, param)
    }

    unsafe fn stream_recv(&self, buffer: RawBufMut, param: RequestParam) -> Issue {
        if self.closed.load(Ordering::Acquire) {
            return Issue::Failed(Status::NOT_CONNECTED);
        }

        // Safety: forwarded from the caller.
        unsafe { self.local.stream_recv(self.peer_id, self.id, buffer, param) }
    }

    unsafe fn tag_send(&self, buffer: RawBuf, tag: Tag, param: RequestParam) -> Issue {
        let peer = match self.peer() {
            Ok(peer) => peer,
            Err(status) => return Issue::Failed(status),
        };

        // Safety: the caller keeps `buffer` valid for this call.
        peer.deliver_tag(unsafe { as_slice(buffer) }, tag);

        trace!(endpoint = self.id, len = buffer.len, tag, "tag send");

        self.finish_send(buffer.len, param)
    }

    unsafe fn put(
        &self,
        buffer: RawBuf,
        remote_addr: u64,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let Some(rkey) = LoopbackRkey::downcast(rkey) else {
            return Issue::Failed(Status::INVALID_PARAM);
        };

        if let Err(status) = self.peer() {
            return Issue::Failed(status);
        }

        // Safety: the caller keeps `buffer` valid for this call.
        match unsafe { rkey.put(buffer.ptr, buffer.len, remote_addr) } {
            Status::OK => self.finish_send(buffer.len, param),
            status => Issue::Failed(status),
        }
    }

    unsafe fn get(
        &self,
        buffer: RawBufMut,
        remote_addr: u64,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let Some(rkey) = LoopbackRkey::downcast(rkey) else {
            return Issue::Failed(Status::INVALID_PARAM);
        };

        if let Err(status) = self.peer() {
            return Issue::Failed(status);
        }

        // Safety: the caller keeps `buffer` valid for this call.
        match unsafe { rkey.get(buffer.ptr, buffer.len, remote_addr) } {
            Status::OK => self.deferred(param, CompletionInfo::None),
            status => Issue::Failed(status),
        }
    }

    fn atomic(
        &self,
        request: AtomicRequest,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let Some(rkey) = LoopbackRkey::downcast(rkey) else {
            return Issue::Failed(Status::INVALID_PARAM);
        };

        if let Err(status) = self.peer() {
            return Issue::Failed(status);
        }

        match rkey.atomic(&request) {
            Ok(previous) if request.fetch => {
                self.deferred(param, CompletionInfo::Fetched(previous))
            }
            Ok(_) => self.deferred(param, CompletionInfo::None),
            Err(status) => Issue::Failed(status),
        }
    }

    fn flush(&self, param: RequestParam) -> Issue {
        // Data already moved; only wait for the completions queued before.
        self.deferred(param, CompletionInfo::None)
    }

    fn close(&self, param: RequestParam) -> Issue {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Issue::Failed(Status::NOT_CONNECTED);
        }

        let mut completions = self.local.cancel_endpoint(self.id);
        completions.push(Deferred::new(param, Status::OK, CompletionInfo::None));

        trace!(
            endpoint = self.id,
            canceled = completions.len() - 1,
            "endpoint closing"
        );

        self.local.defer(completions);
        Issue::InFlight
    }

    fn rkey_unpack(&self, packed: &[u8]) -> Result<Arc<dyn RemoteKeyOps>> {
        Ok(Arc::new(LoopbackRkey::unpack(packed)?))
    }

    fn describe(&self) -> String {
        let state = if self.closed.load(Ordering::Acquire) {
            "closed"
        } else if self.peer.strong_count() == 0 {
            "peer gone"
        } else {
            "connected"
        };

        format!(
            "loopback endpoint {}: worker {} -> worker {} ({state})",
            self.id,
            self.local.id(),
            self.peer_id
        )
    }
}
