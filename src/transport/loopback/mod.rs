//! In-process transport.
//!
//! Every worker created through [`Loopback`] registers in a process-wide
//! fabric; address blobs name a worker in that fabric, so two workers of
//! the same process (or of the same context) can connect to each other
//! through the usual address exchange. Memory regions are plain heap
//! allocations reachable by their packed remote key.
//!
//! Recognized configuration variables (without the `UCXIO_` prefix):
//! - `EAGER_THRESHOLD`: largest send, in bytes, that completes at issue
//!   time. Larger sends complete on the next progress call.

mod endpoint;
mod fabric;
mod memory;
mod worker;

use self::memory::{LoopbackMemory, Region};
use self::worker::{LoopbackWorker, WorkerShared};
use crate::context::Features;
use crate::error::Result;
use crate::transport::{
    Backend, ContextOps, ContextParams, MemRegion, MemoryOps, ThreadMode, WorkerOps,
};

use std::sync::Arc;

use tracing::debug;

/// Settings of the loopback backend.
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    /// Largest send, in bytes, completing at issue time.
    pub eager_threshold: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            eager_threshold: 8192,
        }
    }
}

/// The in-process [`Backend`].
#[derive(Clone, Debug, Default)]
pub struct Loopback {
    config: LoopbackConfig,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoopbackConfig) -> Self {
        Self { config }
    }
}

impl Backend for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn create_context(&self, params: &ContextParams) -> Result<Arc<dyn ContextOps>> {
        let eager_threshold = params
            .config
            .parse::<usize>("EAGER_THRESHOLD")
            .unwrap_or(self.config.eager_threshold);

        Ok(Arc::new(LoopbackContext {
            eager_threshold,
            wakeup: params.features.contains(Features::WAKEUP),
        }))
    }
}

struct LoopbackContext {
    eager_threshold: usize,
    wakeup: bool,
}

impl ContextOps for LoopbackContext {
    fn create_worker(&self, mode: ThreadMode) -> Result<Arc<dyn WorkerOps>> {
        // Workers are always safe to share; the mode only shows in logs.
        debug!(?mode, "creating loopback worker");

        let shared = WorkerShared::new(self.eager_threshold, self.wakeup)?;
        Ok(Arc::new(LoopbackWorker::new(shared)))
    }

    fn mem_map(&self, region: MemRegion) -> Result<Arc<dyn MemoryOps>> {
        Ok(Arc::new(LoopbackMemory::new(Region::map(region)?)))
    }
}
