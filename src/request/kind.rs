use crate::memory::AtomicValue;
use crate::transport::{CompletionInfo, Tag};

use std::marker::PhantomData;

/// Maps a completion payload onto what a request resolves with.
pub trait Kind {
    type Output;

    fn finish(info: CompletionInfo) -> Self::Output;
}

/// Sends, puts, gets, flushes, closes and non-fetching atomics.
pub enum SendLike {}

/// Stream receive: resolves with the number of bytes received.
pub enum StreamRecv {}

/// Tagged receive: resolves with the bytes received and the sender tag.
pub enum TagRecv {}

/// Fetching atomic: resolves with the remote value before the operation.
pub struct Fetch<T>(PhantomData<T>);

impl Kind for SendLike {
    type Output = ();

    fn finish(_: CompletionInfo) {}
}

impl Kind for StreamRecv {
    type Output = usize;

    fn finish(info: CompletionInfo) -> usize {
        match info {
            CompletionInfo::Received(n) => n,
            CompletionInfo::Tagged { length, .. } => length,
            _ => 0,
        }
    }
}

impl Kind for TagRecv {
    type Output = (usize, Tag);

    fn finish(info: CompletionInfo) -> (usize, Tag) {
        match info {
            CompletionInfo::Tagged { length, sender_tag } => (length, sender_tag),
            CompletionInfo::Received(n) => (n, 0),
            _ => (0, 0),
        }
    }
}

impl<T: AtomicValue> Kind for Fetch<T> {
    type Output = T;

    fn finish(info: CompletionInfo) -> T {
        match info {
            CompletionInfo::Fetched(bits) => T::from_bits(bits),
            _ => T::from_bits(0),
        }
    }
}
