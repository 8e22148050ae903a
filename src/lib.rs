//! # ucxio
//!
//! **ucxio** turns a completion-callback transport (contexts, workers,
//! endpoints and registered memory, in the style of UCX) into Rust futures.
//!
//! There is no executor. A transport call is issued when its future is first
//! polled, its completion fires from whichever thread progresses the worker,
//! and the waiting task resumes inline on that thread. An epoll reactor
//! drives worker wakeups and the TCP sockets used to exchange addresses.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ucxio::progress::{ProgressConfig, ProgressThread};
//! use ucxio::transport::{TAG_MASK_FULL, loopback::Loopback};
//! use ucxio::{Context, Endpoint, RemoteAddress, Task, Worker, block_on};
//!
//! let context = Context::builder().enable_tag().build(&Loopback::new())?;
//! let a = Worker::new(&context)?;
//! let b = Worker::new(&context)?;
//!
//! // Completions of `b` fire on a dedicated thread.
//! let _progress = ProgressThread::spawn(b.clone(), ProgressConfig::new())?;
//!
//! let address = b.address()?;
//! let endpoint = Endpoint::new(&a, &RemoteAddress::new(address.as_bytes().to_vec()))?;
//!
//! let received = Task::new(async move {
//!     let mut buffer = [0u8; 16];
//!     let (length, _) = b.tag_recv(&mut buffer, 1, TAG_MASK_FULL).await?;
//!     Ok::<_, ucxio::Error>(buffer[..length].to_vec())
//! })
//! .spawn();
//!
//! block_on(endpoint.tag_send(b"hello", 1))?;
//! assert_eq!(received.wait().unwrap()?, b"hello");
//! ```
//!
//! ## Modules
//!
//! - [`request`]: the future returned by every transport operation
//! - [`runtime`]: tasks resumed inline, `block_on` and `yield_now`
//! - [`reactor`]: one-shot edge-triggered epoll channels
//! - [`progress`]: busy and event-driven worker progress loops
//! - [`bootstrap`]: length-prefixed address exchange over TCP
//! - [`net`]: non-blocking TCP listener and stream on the reactor
//! - [`transport`]: the transport call-shape and the in-process loopback
//!
//! ## Getting Started
//!
//! Add ucxio to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! ucxio = { git = "https://github.com/Nebula-ecosystem/ucxio" }
//! ```

mod address;
mod config;
mod context;
mod endpoint;
mod error;
mod memory;
mod utils;
mod worker;

pub mod bootstrap;
pub mod net;
pub mod progress;
pub mod reactor;
pub mod request;
pub mod runtime;
pub mod transport;

pub use address::{LocalAddress, RemoteAddress};
pub use config::Config;
pub use context::{Context, ContextBuilder, Features};
pub use endpoint::Endpoint;
pub use error::{Error, JoinError, Result};
pub use memory::{AtomicValue, LocalMemoryHandle, PackedRkey, RemoteMemoryHandle};
pub use runtime::{Task, TaskFuture, block_on, yield_now};
pub use worker::Worker;
