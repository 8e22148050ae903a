//! Transport call-shape.
//!
//! This module describes the non-blocking transport library the crate
//! bridges, as a set of object-safe traits:
//! - [`Backend`] creates contexts from a feature set,
//! - [`ContextOps`] creates workers and maps memory,
//! - [`WorkerOps`] drives progress, wakeup arming and worker-level receives,
//! - [`EndpointOps`] issues operations toward one peer,
//! - [`MemoryOps`] and [`RemoteKeyOps`] back registered memory and
//!   unpacked remote keys.
//!
//! Every issuing function takes a [`RequestParam`] and returns an
//! [`Issue`]: either the operation finished on the spot, failed on the
//! spot, or is in flight and the transport will invoke the completion
//! handle later, from whichever thread calls [`WorkerOps::progress`].
//!
//! The crate ships one implementation, [`loopback`], an in-process fabric.

pub mod loopback;

mod status;

pub use status::Status;

use crate::config::Config;
use crate::context::Features;
use crate::error::{Error, Result};

use std::any::Any;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Message tag used by tagged send/receive.
pub type Tag = u64;

/// Mask matching every tag bit.
pub const TAG_MASK_FULL: Tag = u64::MAX;

/// Thread-safety mode requested for a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadMode {
    /// Only one thread at a time touches the worker.
    Single,
    /// Any thread may call into the worker concurrently.
    Multi,
}

/// Remote atomic operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    And,
    Or,
    Xor,
    Swap,
    CompareSwap,
}

/// Operand width of a remote atomic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicWidth {
    Bits32,
    Bits64,
}

/// Parameters of one remote atomic.
#[derive(Clone, Copy, Debug)]
pub struct AtomicRequest {
    pub op: AtomicOp,
    pub width: AtomicWidth,
    /// Value added/and-ed/or-ed/xor-ed/swapped in. For compare-and-swap,
    /// the value written when the comparison succeeds.
    pub operand: u64,
    /// Expected value for compare-and-swap, ignored otherwise.
    pub compare: u64,
    /// Remote virtual address.
    pub remote_addr: u64,
    /// Report the previous remote value through [`CompletionInfo::Fetched`].
    pub fetch: bool,
}

/// Kind-specific payload of a successful completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionInfo {
    None,
    /// Bytes received by a stream receive.
    Received(usize),
    /// Bytes received and sender tag of a tagged receive.
    Tagged { length: usize, sender_tag: Tag },
    /// Remote value before a fetching atomic.
    Fetched(u64),
}

/// Fixed on-complete entry point handed to the transport with each call.
///
/// The transport calls [`complete`](Completion::complete) exactly once for
/// an operation it reported as [`Issue::InFlight`], and never for one it
/// resolved immediately.
pub trait Completion: Send + Sync {
    fn complete(&self, status: Status, info: CompletionInfo);
}

/// Per-call parameter block.
#[derive(Clone, Default)]
pub struct RequestParam {
    /// Completion handle; `None` means fire-and-forget.
    pub callback: Option<Arc<dyn Completion>>,
}

impl RequestParam {
    pub fn new(callback: Arc<dyn Completion>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Whether this block carries `callback` as its completion handle.
    pub fn is_for(&self, callback: &Arc<dyn Completion>) -> bool {
        self.callback
            .as_ref()
            .is_some_and(|own| std::ptr::addr_eq(Arc::as_ptr(own), Arc::as_ptr(callback)))
    }

    /// A parameter block nobody waits on.
    pub fn detached() -> Self {
        Self { callback: None }
    }
}

/// Immediate result of issuing a non-blocking call.
#[derive(Debug)]
pub enum Issue {
    Complete(CompletionInfo),
    Failed(Status),
    InFlight,
}

/// Borrowed source buffer crossing the transport boundary.
#[derive(Clone, Copy, Debug)]
pub struct RawBuf {
    pub ptr: *const u8,
    pub len: usize,
}

/// Borrowed destination buffer crossing the transport boundary.
#[derive(Clone, Copy, Debug)]
pub struct RawBufMut {
    pub ptr: *mut u8,
    pub len: usize,
}

unsafe impl Send for RawBuf {}
unsafe impl Sync for RawBuf {}
unsafe impl Send for RawBufMut {}
unsafe impl Sync for RawBufMut {}

impl RawBuf {
    pub fn from_slice(buffer: &[u8]) -> Self {
        Self {
            ptr: buffer.as_ptr(),
            len: buffer.len(),
        }
    }
}

impl RawBufMut {
    pub fn from_slice(buffer: &mut [u8]) -> Self {
        Self {
            ptr: buffer.as_mut_ptr(),
            len: buffer.len(),
        }
    }
}

/// Memory to map through [`ContextOps::mem_map`].
#[derive(Clone, Copy, Debug)]
pub enum MemRegion {
    /// Register caller-owned memory.
    Register { ptr: *mut u8, len: usize },
    /// Let the transport allocate and register `len` bytes.
    Allocate { len: usize },
}

/// Everything a backend needs to create a context.
#[derive(Clone, Debug, Default)]
pub struct ContextParams {
    pub features: Features,
    pub mt_workers_shared: bool,
    pub config: Config,
}

/// Factory for transport contexts.
pub trait Backend: Send + Sync {
    /// Short backend name, for logs.
    fn name(&self) -> &'static str;

    fn create_context(&self, params: &ContextParams) -> Result<Arc<dyn ContextOps>>;
}

/// A transport context.
pub trait ContextOps: Send + Sync {
    fn create_worker(&self, mode: ThreadMode) -> Result<Arc<dyn WorkerOps>>;

    /// Maps a memory region. Unmapping happens when the returned handle drops.
    fn mem_map(&self, region: MemRegion) -> Result<Arc<dyn MemoryOps>> {
        let _ = region;
        Err(Error::transport(Status::UNSUPPORTED, "failed to map memory"))
    }
}

/// A mapped memory region.
pub trait MemoryOps: Send + Sync {
    fn address(&self) -> *mut u8;

    fn length(&self) -> usize;

    /// Packs the information a peer needs to access this region.
    fn pack_rkey(&self) -> Result<Vec<u8>>;
}

/// An unpacked remote key.
pub trait RemoteKeyOps: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A transport worker.
pub trait WorkerOps: Send + Sync {
    /// Fires pending completions. Returns `true` if any progress was made.
    fn progress(&self) -> bool;

    /// Arms the wakeup event. `Status::BUSY` means work arrived since the
    /// last drain and the caller must progress again before arming.
    fn arm(&self) -> Status;

    /// Blocks until the worker has something to progress.
    fn wait(&self) -> Status;

    /// Event descriptor raised on activity after [`arm`](Self::arm).
    /// `None` when the wakeup feature is off.
    fn event_fd(&self) -> Option<RawFd>;

    /// Acquires the worker's address blob.
    fn get_address(&self) -> Result<Box<[u8]>>;

    /// Releases a blob returned by [`get_address`](Self::get_address).
    fn release_address(&self, address: Box<[u8]>);

    fn create_endpoint(&self, remote: &[u8]) -> Result<Arc<dyn EndpointOps>>;

    /// Posts a tagged receive matching `(sender_tag & mask) == (tag & mask)`.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid until the operation resolves.
    unsafe fn tag_recv(
        &self,
        buffer: RawBufMut,
        tag: Tag,
        mask: Tag,
        param: RequestParam,
    ) -> Issue {
        let _ = (buffer, tag, mask, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    /// Completes once every operation issued on the worker completed.
    fn flush(&self, param: RequestParam) -> Issue {
        let _ = param;
        Issue::Complete(CompletionInfo::None)
    }

    /// Releases a receive still posted with `callback` as its completion
    /// handle, through the worker or any of its endpoints.
    ///
    /// The transport stops writing into the receive's buffer and completes
    /// it with `Status::CANCELED` from a later [`progress`](Self::progress)
    /// call. Returns `false` when nothing is posted under `callback`, for
    /// instance because its data already arrived.
    fn cancel(&self, callback: &Arc<dyn Completion>) -> bool {
        let _ = callback;
        false
    }
}

/// A transport endpoint toward one peer.
///
/// # Safety
///
/// For every `unsafe` issuing function, the buffer must stay valid until
/// the operation resolves (immediately, or through its completion).
pub trait EndpointOps: Send + Sync {
    unsafe fn stream_send(&self, buffer: RawBuf, param: RequestParam) -> Issue {
        let _ = (buffer, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    unsafe fn stream_recv(&self, buffer: RawBufMut, param: RequestParam) -> Issue {
        let _ = (buffer, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    unsafe fn tag_send(&self, buffer: RawBuf, tag: Tag, param: RequestParam) -> Issue {
        let _ = (buffer, tag, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    unsafe fn put(
        &self,
        buffer: RawBuf,
        remote_addr: u64,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let _ = (buffer, remote_addr, rkey, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    unsafe fn get(
        &self,
        buffer: RawBufMut,
        remote_addr: u64,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let _ = (buffer, remote_addr, rkey, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    fn atomic(
        &self,
        request: AtomicRequest,
        rkey: &dyn RemoteKeyOps,
        param: RequestParam,
    ) -> Issue {
        let _ = (request, rkey, param);
        Issue::Failed(Status::UNSUPPORTED)
    }

    fn flush(&self, param: RequestParam) -> Issue;

    fn close(&self, param: RequestParam) -> Issue;

    fn rkey_unpack(&self, packed: &[u8]) -> Result<Arc<dyn RemoteKeyOps>> {
        Err(Error::InvalidRkey(packed.len()))
    }

    /// One-line description used by `Endpoint::print`.
    fn describe(&self) -> String {
        String::from("endpoint")
    }
}
