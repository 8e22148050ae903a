//! Task primitives and thread-blocking entry points.

mod block_on;
mod yield_now;

pub mod task;

pub use block_on::block_on;
pub use task::{Task, TaskFuture};
pub use yield_now::yield_now;
