// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! A fixed-size pool of recycled buffers, grounded on `vbuf_pool.c`.
//!
//! A pool pre-allocates `count` buffers up front. [`Pool::get`] removes one
//! from the free list (blocking, timed, or non-blocking depending on
//! `timeout_ms`); returning every outstanding reference eventually brings a
//! buffer's count back to zero, at which point [`crate::buffer::Buffer`]'s
//! drop path hands it back to this free list automatically. The pool never
//! allocates past its initial population.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use crate::backend::Backend;
use crate::buffer::{Buffer, BufferInner, BufferView, PayloadRegion};
use crate::error::{Error, Result};
use crate::event::ReadinessEvent;
use crate::metadata::MetadataStore;

pub(crate) struct PoolInner {
    free: ArrayQueue<Arc<BufferInner>>,
    count: usize,
    gate: Mutex<()>,
    condvar: Condvar,
    backend: Arc<dyn Backend>,
    event: Option<ReadinessEvent>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let remaining = self.free.len();
        if remaining != self.count {
            tracing::warn!(
                context = "pool_destroy",
                count = self.count,
                outstanding = self.count - remaining,
                "pool destroyed with buffers still checked out",
            );
        }
    }
}

/// A fixed-size pool of recycled buffers. Cloning shares the same
/// underlying population.
#[derive(Clone)]
pub struct Pool(pub(crate) Arc<PoolInner>);

impl Pool {
    /// Build a pool of `count` buffers, each with `capacity` payload bytes
    /// and `userdata_capacity` user-data bytes, allocated through `backend`.
    pub fn new(
        count: usize,
        capacity: usize,
        userdata_capacity: usize,
        backend: Arc<dyn Backend>,
    ) -> Result<Pool> {
        let free = ArrayQueue::new(count.max(1));

        // `Arc::new_cyclic` lets every buffer hold a non-owning `Weak` back
        // to the pool without an ownership cycle: the pool owns its
        // buffers (via `free`), and buffers merely know how to find their
        // pool, not keep it alive.
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<PoolInner>| {
            for _ in 0..count {
                match build_pooled_buffer(capacity, userdata_capacity, &backend, weak.clone()) {
                    Ok(buf) => {
                        let _ = free.push(buf);
                    }
                    Err(_) => {
                        // Allocation failed partway through population; the
                        // already-built buffers in `free` are dropped along
                        // with this `Arc` once construction finishes and the
                        // caller's `?` propagates the error (checked below).
                    }
                }
            }
            PoolInner {
                free,
                count,
                gate: Mutex::new(()),
                condvar: Condvar::new(),
                backend,
                event: ReadinessEvent::new().ok(),
            }
        });

        if inner.free.len() != count {
            return Err(Error::out_of_memory("pool: failed to allocate full population"));
        }

        Ok(Pool(inner))
    }

    /// Number of buffers currently available in the free list.
    pub fn get_count(&self) -> usize {
        self.0.free.len()
    }

    /// Total population size.
    pub fn capacity(&self) -> usize {
        self.0.count
    }

    /// The readiness event signalled whenever a buffer is returned to the
    /// free list, or `None` on platforms without `eventfd` support.
    pub fn get_evt(&self) -> Option<&ReadinessEvent> {
        self.0.event.as_ref()
    }

    /// Remove a buffer from the free list.
    ///
    /// `timeout_ms < 0` blocks indefinitely, `== 0` returns immediately
    /// (`Error::TryAgain` if empty), `> 0` waits up to that many
    /// milliseconds. Matches the single-attempt-wait discipline: at most
    /// one wait, followed by exactly one recheck.
    pub fn get(&self, timeout_ms: i64) -> Result<Buffer> {
        if let Some(buf) = self.0.free.pop() {
            return self.finish_get(buf, timeout_ms);
        }

        let mut guard = self.0.gate.lock();
        if let Some(buf) = self.0.free.pop() {
            drop(guard);
            return self.finish_get(buf, timeout_ms);
        }

        if timeout_ms == 0 {
            return Err(Error::try_again("pool is empty"));
        }
        let timed_out = if timeout_ms < 0 {
            self.0.condvar.wait(&mut guard);
            false
        } else {
            self.0
                .condvar
                .wait_for(&mut guard, Duration::from_millis(timeout_ms as u64))
                .timed_out()
        };
        let popped = self.0.free.pop();
        drop(guard);

        match popped {
            Some(buf) => self.finish_get(buf, timeout_ms),
            None if timed_out => Err(Error::timed_out("pool wait deadline elapsed")),
            None => Err(Error::try_again("pool is empty after wait")),
        }
    }

    fn finish_get(&self, inner: Arc<BufferInner>, timeout_ms: i64) -> Result<Buffer> {
        inner.refcount.store(1, std::sync::atomic::Ordering::SeqCst);
        let view = BufferView::from_inner(&inner);
        if let Err(e) = self.0.backend.pool_get(&view, timeout_ms) {
            let buf = Buffer(Some(inner));
            let _ = buf.unref();
            return Err(e);
        }
        Ok(Buffer(Some(inner)))
    }

    /// Wake every thread currently blocked in [`Pool::get`]. Each wakes,
    /// rechecks the free list exactly once, and returns `Error::TryAgain`
    /// if it is still empty. Not a persistent flag: a later `get` call
    /// waits normally.
    pub fn abort(&self) {
        let _guard = self.0.gate.lock();
        self.0.condvar.notify_all();
    }
}

/// Return a buffer to its pool's free list. Called from
/// [`crate::buffer::finish_unref`] once a buffer's reference count reaches
/// zero and its owning pool is still alive.
pub(crate) fn pool_return(pool_inner: &Arc<PoolInner>, inner: Arc<BufferInner>) {
    let view = BufferView::from_inner(&inner);
    if let Err(e) = pool_inner.backend.pool_put(&view) {
        tracing::warn!(
            context = "pool_put_hook",
            error = %e,
            "pool_put hook failed; buffer is returned to the free list regardless",
        );
    }

    let mut guard = pool_inner.gate.lock();
    let was_empty = pool_inner.free.is_empty();
    if pool_inner.free.push(inner).is_err() {
        tracing::warn!(
            context = "pool_put",
            "free list rejected a returning buffer; population invariant violated",
        );
    }
    if let Some(evt) = &pool_inner.event {
        if let Err(e) = evt.signal() {
            tracing::warn!(context = "pool_put", error = %e, "readiness event signal failed");
        }
    }
    if was_empty {
        pool_inner.condvar.notify_one();
    }
    drop(guard);
}

fn build_pooled_buffer(
    capacity: usize,
    userdata_capacity: usize,
    backend: &Arc<dyn Backend>,
    pool: std::sync::Weak<PoolInner>,
) -> Result<Arc<BufferInner>> {
    let payload_data = backend.acquire(capacity)?;
    let userdata_data = match crate::backend::alloc_zeroed(userdata_capacity) {
        Ok(v) => v,
        Err(e) => {
            backend.release(payload_data);
            return Err(e);
        }
    };

    Ok(Arc::new(BufferInner {
        refcount: std::sync::atomic::AtomicUsize::new(0),
        write_locked: std::sync::atomic::AtomicBool::new(false),
        payload: Mutex::new(PayloadRegion {
            data: payload_data,
            size: 0,
        }),
        userdata: Mutex::new(PayloadRegion {
            data: userdata_data,
            size: 0,
        }),
        metadata: Mutex::new(MetadataStore::new()),
        pool: Some(pool),
        backend: Arc::clone(backend),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapBackend;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn backend() -> Arc<dyn Backend> {
        StdArc::new(HeapBackend)
    }

    /// Scenario 1: pool drain and wake.
    #[test]
    fn pool_drain_and_recycle() {
        let pool = Pool::new(2, 8, 0, backend()).unwrap();
        let a = pool.get(0).unwrap();
        let b = pool.get(0).unwrap();
        assert_eq!(pool.get_count(), 0);
        assert!(matches!(pool.get(0), Err(Error::TryAgain { .. })));

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.get(-1).unwrap());

        thread::sleep(StdDuration::from_millis(20));
        a.unref().unwrap();
        let recycled = handle.join().unwrap();
        assert_eq!(recycled.ref_count(), 1);

        b.unref().unwrap();
        recycled.unref().unwrap();
        assert_eq!(pool.get_count(), 2);
    }

    #[test]
    fn timed_get_on_empty_pool_times_out() {
        let pool = Pool::new(1, 4, 0, backend()).unwrap();
        let _held = pool.get(0).unwrap();
        let err = pool.get(20).unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));
    }

    #[test]
    fn abort_wakes_blocked_waiter() {
        let pool = Pool::new(1, 4, 0, backend()).unwrap();
        let _held = pool.get(0).unwrap();

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.get(-1));

        thread::sleep(StdDuration::from_millis(20));
        pool.abort();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::TryAgain { .. })));
    }

    #[test]
    fn buffer_knows_its_pool() {
        let pool = Pool::new(1, 4, 0, backend()).unwrap();
        let buf = pool.get(0).unwrap();
        assert!(buf.pool().is_some());
        assert_eq!(buf.pool().unwrap().get_count(), 0);
    }

    /// Pool-conservation law: every buffer is always either checked out or
    /// in the free list, never both, never neither.
    #[test]
    fn pool_conserves_population() {
        let pool = Pool::new(3, 4, 0, backend()).unwrap();
        let a = pool.get(0).unwrap();
        let b = pool.get(0).unwrap();
        assert_eq!(pool.get_count(), 1);
        a.unref().unwrap();
        assert_eq!(pool.get_count(), 2);
        b.unref().unwrap();
        assert_eq!(pool.get_count(), 3);
    }
}
