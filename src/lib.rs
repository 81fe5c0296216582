// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # framepool
//!
//! Reference-counted buffer management for pipelines that move payloads
//! (video frames, audio samples, or any other binary blob) between threads
//! without copying.
//!
//! - **[`Buffer`]** - a payload plus user data plus typed metadata, with
//!   explicit reference counting and an optional write lock.
//! - **[`Backend`]** - the pluggable allocator/notification hook set a
//!   buffer is bound to at construction; **[`HeapBackend`]** is the trivial
//!   instance.
//! - **[`Pool`]** - a fixed-size population of buffers recycled through a
//!   free list, for pipelines that want to bound their memory footprint.
//! - **[`Queue`]** - a bounded FIFO for handing buffers from a producer
//!   thread to a consumer thread.
//! - **[`ReadinessEvent`]** - an edge-triggered file descriptor for wiring
//!   a pool or queue into an external `epoll`-style event loop.
//!
//! ## Example: producer/consumer over a queue
//!
//! ```rust
//! use framepool::{Buffer, HeapBackend, Queue};
//! use std::sync::Arc;
//!
//! let queue = Queue::new(4, false);
//! let backend = Arc::new(HeapBackend);
//!
//! let buf = Buffer::new(64, 0, backend, None).unwrap();
//! buf.set_size(10).unwrap();
//! queue.push(&buf).unwrap();
//! buf.unref().unwrap();
//!
//! let popped = queue.pop(0).unwrap().buffer;
//! assert_eq!(popped.size(), 10);
//! popped.unref().unwrap();
//! ```
//!
//! ## Example: recycling through a pool
//!
//! ```rust
//! use framepool::{HeapBackend, Pool};
//! use std::sync::Arc;
//!
//! let pool = Pool::new(2, 1920 * 1080 * 3 / 2, 0, Arc::new(HeapBackend)).unwrap();
//! let buf = pool.get(0).unwrap();
//! assert_eq!(pool.get_count(), 1);
//! buf.unref().unwrap();
//! assert_eq!(pool.get_count(), 2);
//! ```

mod backend;
mod buffer;
mod error;
mod event;
mod metadata;
mod pool;
mod queue;

pub use backend::{Backend, HeapBackend};
pub use buffer::{Buffer, BufferView, DataMut, DataRef, UnrefError};
pub use error::{Error, Result};
pub use event::ReadinessEvent;
pub use metadata::MetaKey;
pub use pool::Pool;
pub use queue::{PeekedBuffer, PopResult, Queue};
