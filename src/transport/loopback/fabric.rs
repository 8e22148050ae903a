use super::memory::Region;
use super::worker::WorkerShared;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

const ADDRESS_MAGIC: &[u8; 8] = b"LOOPBACK";

/// Length of a worker address blob.
pub(crate) const ADDRESS_LEN: usize = 16;

/// Process-wide table of live workers and memory regions.
pub(crate) struct Fabric {
    next_id: AtomicU64,
    workers: Mutex<HashMap<u64, Weak<WorkerShared>>>,
    regions: Mutex<HashMap<u64, Weak<Region>>>,
}

static FABRIC: LazyLock<Fabric> = LazyLock::new(|| Fabric {
    next_id: AtomicU64::new(1),
    workers: Mutex::new(HashMap::new()),
    regions: Mutex::new(HashMap::new()),
});

pub(crate) fn fabric() -> &'static Fabric {
    &FABRIC
}

impl Fabric {
    /// Fresh identifier for a worker, endpoint or region.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_worker(&self, worker: &Arc<WorkerShared>) {
        self.workers
            .lock()
            .insert(worker.id(), Arc::downgrade(worker));
    }

    pub(crate) fn remove_worker(&self, id: u64) {
        self.workers.lock().remove(&id);
    }

    pub(crate) fn worker(&self, id: u64) -> Option<Arc<WorkerShared>> {
        self.workers.lock().get(&id).and_then(Weak::upgrade)
    }

    pub(crate) fn add_region(&self, region: &Arc<Region>) {
        self.regions
            .lock()
            .insert(region.id(), Arc::downgrade(region));
    }

    pub(crate) fn remove_region(&self, id: u64) {
        self.regions.lock().remove(&id);
    }

    pub(crate) fn region(&self, id: u64) -> Option<Weak<Region>> {
        self.regions.lock().get(&id).cloned()
    }
}

pub(crate) fn encode_address(id: u64) -> Box<[u8]> {
    let mut bytes = Vec::with_capacity(ADDRESS_LEN);
    bytes.extend_from_slice(ADDRESS_MAGIC);
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.into_boxed_slice()
}

pub(crate) fn decode_address(bytes: &[u8]) -> Option<u64> {
    if bytes.len() != ADDRESS_LEN || &bytes[..8] != ADDRESS_MAGIC {
        return None;
    }

    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[8..]);
    Some(u64::from_le_bytes(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_blob_round_trips_id() {
        let blob = encode_address(0xDEAD_BEEF);

        assert_eq!(blob.len(), ADDRESS_LEN);
        assert_eq!(decode_address(&blob), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_foreign_blob_is_rejected() {
        assert_eq!(decode_address(b"LOOPBACK"), None);
        assert_eq!(decode_address(&[0u8; ADDRESS_LEN]), None);
    }
}
