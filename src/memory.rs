use crate::context::{Context, Features};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::request::{Call, Fetch, Kind, Request, SendLike};
use crate::transport::{AtomicOp, AtomicRequest, AtomicWidth, MemRegion, MemoryOps, RemoteKeyOps};

use std::fmt;
use std::sync::Arc;

use tracing::debug;

mod sealed {
    pub trait Sealed {}

    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// Operand types of remote atomics: 4 or 8 bytes wide.
pub trait AtomicValue: sealed::Sealed + Copy + Send + Sync + 'static {
    const WIDTH: AtomicWidth;

    /// Context feature required for this width.
    const FEATURE: Features;

    fn to_bits(self) -> u64;

    fn from_bits(bits: u64) -> Self;
}

impl AtomicValue for u32 {
    const WIDTH: AtomicWidth = AtomicWidth::Bits32;
    const FEATURE: Features = Features::AMO32;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u32
    }
}

impl AtomicValue for i32 {
    const WIDTH: AtomicWidth = AtomicWidth::Bits32;
    const FEATURE: Features = Features::AMO32;

    fn to_bits(self) -> u64 {
        self as u32 as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u32 as i32
    }
}

impl AtomicValue for u64 {
    const WIDTH: AtomicWidth = AtomicWidth::Bits64;
    const FEATURE: Features = Features::AMO64;

    fn to_bits(self) -> u64 {
        self
    }

    fn from_bits(bits: u64) -> Self {
        bits
    }
}

impl AtomicValue for i64 {
    const WIDTH: AtomicWidth = AtomicWidth::Bits64;
    const FEATURE: Features = Features::AMO64;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as i64
    }
}

/// A registered local memory region.
///
/// The region is unmapped when the handle drops.
pub struct LocalMemoryHandle {
    context: Arc<Context>,
    ops: Arc<dyn MemoryOps>,
}

impl LocalMemoryHandle {
    /// Allocates and registers `length` bytes, zero-initialized.
    pub fn allocate(context: &Arc<Context>, length: usize) -> Result<Self> {
        let ops = context
            .ops()
            .mem_map(MemRegion::Allocate { len: length })?;

        debug!(length, "memory allocated and mapped");

        Ok(Self {
            context: context.clone(),
            ops,
        })
    }

    /// Registers caller-owned memory.
    ///
    /// # Safety
    ///
    /// `address..address + length` must stay valid, and must not be moved
    /// or freed, until the handle and every remote key packed from it are
    /// dropped. Peers may read and write it concurrently.
    pub unsafe fn register(context: &Arc<Context>, address: *mut u8, length: usize) -> Result<Self> {
        let ops = context.ops().mem_map(MemRegion::Register {
            ptr: address,
            len: length,
        })?;

        debug!(length, "memory registered");

        Ok(Self {
            context: context.clone(),
            ops,
        })
    }

    /// Start of the region; remote accesses address it from here.
    pub fn address(&self) -> *mut u8 {
        self.ops.address()
    }

    pub fn len(&self) -> usize {
        self.ops.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remote virtual address of the first byte, as peers address it.
    pub fn remote_addr(&self) -> u64 {
        self.address() as u64
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Packs the information a peer needs for remote access.
    pub fn pack_rkey(&self) -> Result<PackedRkey> {
        Ok(PackedRkey(self.ops.pack_rkey()?))
    }
}

impl fmt::Debug for LocalMemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMemoryHandle")
            .field("address", &self.address())
            .field("len", &self.len())
            .finish()
    }
}

/// A serialized remote key, ready to send to a peer.
#[derive(Clone, PartialEq, Eq)]
pub struct PackedRkey(Vec<u8>);

impl PackedRkey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for PackedRkey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PackedRkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackedRkey({} bytes)", self.0.len())
    }
}

/// A peer's memory region, accessed through one endpoint.
///
/// The handle does not know the remote addresses; callers pass the remote
/// virtual address with each access.
pub struct RemoteMemoryHandle {
    endpoint: Arc<Endpoint>,
    rkey: Arc<dyn RemoteKeyOps>,
}

impl RemoteMemoryHandle {
    /// Unpacks `packed` against `endpoint`.
    pub fn new(endpoint: &Arc<Endpoint>, packed: &[u8]) -> Result<Self> {
        let rkey = endpoint.ops().rkey_unpack(packed)?;

        Ok(Self {
            endpoint: endpoint.clone(),
            rkey,
        })
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Writes `buffer` to the remote region at `remote_addr`.
    pub fn put<'a>(&'a self, buffer: &'a [u8], remote_addr: u64) -> Request<'a, SendLike> {
        self.request(
            Features::RMA,
            Call::Put {
                endpoint: &self.endpoint,
                buffer,
                remote_addr,
                rkey: &*self.rkey,
            },
        )
    }

    /// Reads from the remote region at `remote_addr` into `buffer`.
    pub fn get<'a>(&'a self, buffer: &'a mut [u8], remote_addr: u64) -> Request<'a, SendLike> {
        self.request(
            Features::RMA,
            Call::Get {
                endpoint: &self.endpoint,
                buffer,
                remote_addr,
                rkey: &*self.rkey,
            },
        )
    }

    /// Same as [`put`](Self::put).
    pub fn write<'a>(&'a self, buffer: &'a [u8], remote_addr: u64) -> Request<'a, SendLike> {
        self.put(buffer, remote_addr)
    }

    /// Same as [`get`](Self::get).
    pub fn read<'a>(&'a self, buffer: &'a mut [u8], remote_addr: u64) -> Request<'a, SendLike> {
        self.get(buffer, remote_addr)
    }

    /// Atomically adds `delta`; resolves with the previous value.
    pub fn atomic_fetch_add<T: AtomicValue>(&self, remote_addr: u64, delta: T) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::Add, remote_addr, delta, T::from_bits(0), true)
    }

    /// Atomically ANDs `bits`; resolves with the previous value.
    pub fn atomic_fetch_and<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::And, remote_addr, bits, T::from_bits(0), true)
    }

    /// Atomically ORs `bits`; resolves with the previous value.
    pub fn atomic_fetch_or<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::Or, remote_addr, bits, T::from_bits(0), true)
    }

    /// Atomically XORs `bits`; resolves with the previous value.
    pub fn atomic_fetch_xor<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::Xor, remote_addr, bits, T::from_bits(0), true)
    }

    /// Atomically adds `delta`.
    pub fn atomic_add<T: AtomicValue>(&self, remote_addr: u64, delta: T) -> Request<'_, SendLike> {
        self.atomic(AtomicOp::Add, remote_addr, delta, T::from_bits(0), false)
    }

    /// Atomically ANDs `bits`.
    pub fn atomic_and<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, SendLike> {
        self.atomic(AtomicOp::And, remote_addr, bits, T::from_bits(0), false)
    }

    /// Atomically ORs `bits`.
    pub fn atomic_or<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, SendLike> {
        self.atomic(AtomicOp::Or, remote_addr, bits, T::from_bits(0), false)
    }

    /// Atomically XORs `bits`.
    pub fn atomic_xor<T: AtomicValue>(&self, remote_addr: u64, bits: T) -> Request<'_, SendLike> {
        self.atomic(AtomicOp::Xor, remote_addr, bits, T::from_bits(0), false)
    }

    /// Atomically swaps in `new_value`; resolves with the previous value.
    pub fn atomic_swap<T: AtomicValue>(&self, remote_addr: u64, new_value: T) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::Swap, remote_addr, new_value, T::from_bits(0), true)
    }

    /// Writes `desired` if the remote value equals `expected`.
    ///
    /// Resolves with the previous value; the swap happened iff it equals
    /// `expected`.
    pub fn atomic_compare_swap<T: AtomicValue>(
        &self,
        remote_addr: u64,
        expected: T,
        desired: T,
    ) -> Request<'_, Fetch<T>> {
        self.atomic(AtomicOp::CompareSwap, remote_addr, desired, expected, true)
    }

    fn atomic<T: AtomicValue, K: Kind>(
        &self,
        op: AtomicOp,
        remote_addr: u64,
        operand: T,
        compare: T,
        fetch: bool,
    ) -> Request<'_, K> {
        self.request(
            T::FEATURE,
            Call::Atomic {
                endpoint: &self.endpoint,
                request: AtomicRequest {
                    op,
                    width: T::WIDTH,
                    operand: operand.to_bits(),
                    compare: compare.to_bits(),
                    remote_addr,
                    fetch,
                },
                rkey: &*self.rkey,
            },
        )
    }

    fn request<'a, K: Kind>(&'a self, feature: Features, call: Call<'a>) -> Request<'a, K> {
        let worker = self.endpoint.worker();

        match worker.context().require(feature) {
            Ok(()) => Request::new(worker, call),
            Err(error) => Request::rejected(worker, error),
        }
    }
}

impl fmt::Debug for RemoteMemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMemoryHandle")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
