use crate::bootstrap::{BootstrapStream, encode_address, write_address};
use crate::error::Result;
use crate::worker::Worker;

use std::fmt;
use std::sync::Arc;

/// The local worker's transport address.
///
/// The blob is owned by the worker and released through the transport
/// when this value drops.
pub struct LocalAddress {
    worker: Arc<Worker>,
    bytes: Option<Box<[u8]>>,
}

impl LocalAddress {
    pub(crate) fn new(worker: Arc<Worker>, bytes: Box<[u8]>) -> Self {
        Self {
            worker,
            bytes: Some(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Length-prefixed wire form: an 8-byte big-endian length, then the blob.
    pub fn serialize(&self) -> Vec<u8> {
        encode_address(self.as_bytes())
    }

    /// Writes the framed address to `stream`.
    pub async fn send_to<S: BootstrapStream>(&self, stream: &S) -> Result<()> {
        write_address(stream, self.as_bytes()).await
    }
}

impl Drop for LocalAddress {
    fn drop(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            self.worker.ops().release_address(bytes);
        }
    }
}

impl fmt::Debug for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAddress")
            .field("len", &self.len())
            .finish()
    }
}

/// A peer's transport address, as received during bootstrap.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    bytes: Vec<u8>,
}

impl RemoteAddress {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for RemoteAddress {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAddress")
            .field("len", &self.len())
            .finish()
    }
}
