use super::fabric::fabric;
use crate::error::{Error, Result};
use crate::transport::{AtomicOp, AtomicRequest, AtomicWidth, MemRegion, MemoryOps, RemoteKeyOps, Status};

use std::alloc::{self, Layout};
use std::any::Any;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

const RKEY_MAGIC: &[u8; 8] = b"LBRKEY\0\0";
const RKEY_LEN: usize = 32;

/// Alignment of allocated regions, enough for 64-bit atomics.
const REGION_ALIGN: usize = 8;

/// A mapped region, registered in the fabric while alive.
pub(crate) struct Region {
    id: u64,
    base: NonNull<u8>,
    len: usize,

    /// Set when the region was allocated here rather than registered.
    layout: Option<Layout>,
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn map(region: MemRegion) -> Result<Arc<Self>> {
        let (base, len, layout) = match region {
            MemRegion::Register { ptr, len } => {
                let base = NonNull::new(ptr).ok_or_else(|| {
                    Error::transport(Status::INVALID_PARAM, "failed to register null memory")
                })?;
                (base, len, None)
            }
            MemRegion::Allocate { len: 0 } => (NonNull::dangling(), 0, None),
            MemRegion::Allocate { len } => {
                let layout = Layout::from_size_align(len, REGION_ALIGN).map_err(|_| {
                    Error::transport(Status::INVALID_PARAM, "failed to allocate memory")
                })?;

                // Safety: the layout has a non-zero size.
                let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(|| {
                    Error::transport(Status::NO_MEMORY, "failed to allocate memory")
                })?;

                (base, len, Some(layout))
            }
        };

        let region = Arc::new(Self {
            id: fabric().next_id(),
            base,
            len,
            layout,
        });

        fabric().add_region(&region);

        Ok(region)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn start(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    /// Pointer to `len` bytes at remote address `addr`, if they all lie in
    /// the region.
    fn locate(&self, addr: u64, len: usize) -> Option<*mut u8> {
        let offset = addr.checked_sub(self.start())?;
        let end = offset.checked_add(len as u64)?;

        if end > self.len as u64 {
            return None;
        }

        // Safety: offset + len is within the region.
        Some(unsafe { self.base.as_ptr().add(offset as usize) })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        fabric().remove_region(self.id);

        if let Some(layout) = self.layout {
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }

        debug!(id = self.id, len = self.len, "loopback region unmapped");
    }
}

/// [`MemoryOps`] of a loopback region.
pub(crate) struct LoopbackMemory {
    region: Arc<Region>,
}

impl LoopbackMemory {
    pub(crate) fn new(region: Arc<Region>) -> Self {
        Self { region }
    }
}

impl MemoryOps for LoopbackMemory {
    fn address(&self) -> *mut u8 {
        self.region.base.as_ptr()
    }

    fn length(&self) -> usize {
        self.region.len
    }

    fn pack_rkey(&self) -> Result<Vec<u8>> {
        let mut packed = Vec::with_capacity(RKEY_LEN);
        packed.extend_from_slice(RKEY_MAGIC);
        packed.extend_from_slice(&self.region.id.to_le_bytes());
        packed.extend_from_slice(&self.region.start().to_le_bytes());
        packed.extend_from_slice(&(self.region.len as u64).to_le_bytes());
        Ok(packed)
    }
}

/// An unpacked loopback remote key.
///
/// Holds the region weakly: once the owner unmaps it, every access fails
/// with `INVALID_ADDR`.
pub(crate) struct LoopbackRkey {
    region: Weak<Region>,
}

impl LoopbackRkey {
    pub(crate) fn unpack(packed: &[u8]) -> Result<Self> {
        if packed.len() != RKEY_LEN || &packed[..8] != RKEY_MAGIC {
            return Err(Error::InvalidRkey(packed.len()));
        }

        let field = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&packed[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        let region = fabric()
            .region(field(8))
            .ok_or(Error::InvalidRkey(packed.len()))?;

        Ok(Self { region })
    }

    pub(crate) fn downcast(rkey: &dyn RemoteKeyOps) -> Option<&Self> {
        rkey.as_any().downcast_ref()
    }

    /// Copies `len` bytes from `source` to remote address `addr`.
    ///
    /// # Safety
    ///
    /// `source` must be valid for `len` bytes.
    pub(crate) unsafe fn put(&self, source: *const u8, len: usize, addr: u64) -> Status {
        self.with_target(addr, len, |target| {
            unsafe { ptr::copy(source, target, len) };
            Status::OK
        })
        .unwrap_or(Status::INVALID_ADDR)
    }

    /// Copies `len` bytes from remote address `addr` to `dest`.
    ///
    /// # Safety
    ///
    /// `dest` must be valid for `len` bytes.
    pub(crate) unsafe fn get(&self, dest: *mut u8, len: usize, addr: u64) -> Status {
        self.with_target(addr, len, |source| {
            unsafe { ptr::copy(source, dest, len) };
            Status::OK
        })
        .unwrap_or(Status::INVALID_ADDR)
    }

    /// Applies `request` and returns the previous value.
    pub(crate) fn atomic(&self, request: &AtomicRequest) -> std::result::Result<u64, Status> {
        let width = match request.width {
            AtomicWidth::Bits32 => 4,
            AtomicWidth::Bits64 => 8,
        };

        self.with_target(request.remote_addr, width, |target| {
            if target as usize % width != 0 {
                return Err(Status::INVALID_PARAM);
            }

            // Safety: the target is in bounds, aligned, and remote memory is
            // only ever accessed atomically or through explicit copies.
            let previous = match request.width {
                AtomicWidth::Bits32 => {
                    let cell = unsafe { AtomicU32::from_ptr(target as *mut u32) };
                    apply32(cell, request) as u64
                }
                AtomicWidth::Bits64 => {
                    let cell = unsafe { AtomicU64::from_ptr(target as *mut u64) };
                    apply64(cell, request)
                }
            };

            Ok(previous)
        })
        .unwrap_or(Err(Status::INVALID_ADDR))
    }

    /// Runs `access` on `len` bytes at remote address `addr`.
    ///
    /// The region stays mapped until `access` returns. `None` when the
    /// region is gone or the range falls outside it.
    fn with_target<R>(
        &self,
        addr: u64,
        len: usize,
        access: impl FnOnce(*mut u8) -> R,
    ) -> Option<R> {
        let region = self.region.upgrade()?;
        let target = region.locate(addr, len)?;
        let result = access(target);

        drop(region);
        Some(result)
    }
}

impl RemoteKeyOps for LoopbackRkey {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn apply32(cell: &AtomicU32, request: &AtomicRequest) -> u32 {
    let operand = request.operand as u32;

    match request.op {
        AtomicOp::Add => cell.fetch_add(operand, Ordering::SeqCst),
        AtomicOp::And => cell.fetch_and(operand, Ordering::SeqCst),
        AtomicOp::Or => cell.fetch_or(operand, Ordering::SeqCst),
        AtomicOp::Xor => cell.fetch_xor(operand, Ordering::SeqCst),
        AtomicOp::Swap => cell.swap(operand, Ordering::SeqCst),
        AtomicOp::CompareSwap => {
            match cell.compare_exchange(
                request.compare as u32,
                operand,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(previous) | Err(previous) => previous,
            }
        }
    }
}

fn apply64(cell: &AtomicU64, request: &AtomicRequest) -> u64 {
    let operand = request.operand;

    match request.op {
        AtomicOp::Add => cell.fetch_add(operand, Ordering::SeqCst),
        AtomicOp::And => cell.fetch_and(operand, Ordering::SeqCst),
        AtomicOp::Or => cell.fetch_or(operand, Ordering::SeqCst),
        AtomicOp::Xor => cell.fetch_xor(operand, Ordering::SeqCst),
        AtomicOp::Swap => cell.swap(operand, Ordering::SeqCst),
        AtomicOp::CompareSwap => {
            match cell.compare_exchange(request.compare, operand, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(previous) | Err(previous) => previous,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocate(len: usize) -> (Arc<Region>, LoopbackRkey) {
        let region = Region::map(MemRegion::Allocate { len }).unwrap();
        let packed = LoopbackMemory::new(region.clone()).pack_rkey().unwrap();
        (region, LoopbackRkey::unpack(&packed).unwrap())
    }

    #[test]
    fn test_out_of_bounds_access_is_rejected() {
        let (region, rkey) = allocate(16);
        let start = region.start();
        let data = [1u8; 8];

        assert_eq!(unsafe { rkey.put(data.as_ptr(), 8, start + 8) }, Status::OK);
        assert_eq!(unsafe { rkey.put(data.as_ptr(), 8, start + 9) }, Status::INVALID_ADDR);
        assert_eq!(unsafe { rkey.put(data.as_ptr(), 1, start - 1) }, Status::INVALID_ADDR);
    }

    #[test]
    fn test_compare_swap_reports_previous_value() {
        let (region, rkey) = allocate(8);

        let mut request = AtomicRequest {
            op: AtomicOp::CompareSwap,
            width: AtomicWidth::Bits64,
            operand: 9,
            compare: 1,
            remote_addr: region.start(),
            fetch: true,
        };

        // Region starts zeroed: the comparison fails.
        assert_eq!(rkey.atomic(&request), Ok(0));
        request.compare = 0;
        assert_eq!(rkey.atomic(&request), Ok(0));
        assert_eq!(rkey.atomic(&request), Ok(9));
    }

    #[test]
    fn test_unmapped_region_is_unreachable() {
        let (region, rkey) = allocate(8);
        let start = region.start();
        drop(region);

        let mut byte = 0u8;
        assert_eq!(unsafe { rkey.get(&mut byte, 1, start) }, Status::INVALID_ADDR);
        assert!(LoopbackRkey::unpack(b"garbage").is_err());
    }

    #[test]
    fn test_access_keeps_region_mapped() {
        let (region, rkey) = allocate(8);
        let start = region.start();
        let weak = Arc::downgrade(&region);

        let unmapped = rkey.with_target(start, 8, |_| {
            // The owner lets go mid-access; the region must survive it.
            drop(region);
            weak.strong_count() == 0
        });

        assert_eq!(unmapped, Some(false));
        assert_eq!(weak.strong_count(), 0);

        let request = AtomicRequest {
            op: AtomicOp::Add,
            width: AtomicWidth::Bits64,
            operand: 1,
            compare: 0,
            remote_addr: start,
            fetch: true,
        };
        assert_eq!(rkey.atomic(&request), Err(Status::INVALID_ADDR));
    }
}
