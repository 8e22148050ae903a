//! Internal data structures.

mod slab;

pub(crate) use slab::Slab;
