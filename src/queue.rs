// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! A bounded FIFO queue for transferring buffers between threads, grounded
//! on `vbuf_queue.c`.
//!
//! Unlike [`crate::pool::Pool`], a queue does not own the buffers passing
//! through it: [`Queue::push`] takes an additional reference on the caller's
//! buffer and stores it; [`Queue::pop`] hands that reference back to the
//! caller. [`Queue::peek`] inspects an entry by index without touching its
//! reference count at all, returning a [`PeekedBuffer`] that deliberately
//! cannot be used to mutate or release the entry it observed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::{Buffer, BufferInner, BufferView};
use crate::error::{Error, Result};
use crate::event::ReadinessEvent;

struct QueueState {
    items: VecDeque<Arc<BufferInner>>,
}

pub(crate) struct QueueInner {
    state: Mutex<QueueState>,
    condvar: Condvar,
    /// `0` means unbounded; `drop_when_full` is then never consulted.
    capacity: usize,
    drop_when_full: bool,
    event: Option<ReadinessEvent>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if !state.items.is_empty() {
            tracing::warn!(
                context = "queue_destroy",
                outstanding = state.items.len(),
                "queue destroyed while non-empty; flushing",
            );
        }
        let items: Vec<_> = state.items.drain(..).collect();
        drop(state);
        for entry in items {
            drop(Buffer(Some(entry)));
        }
    }
}

/// A bounded FIFO queue of buffer references. Cloning shares the same
/// underlying queue.
#[derive(Clone)]
pub struct Queue(Arc<QueueInner>);

/// A read-only handle to a queue entry observed by [`Queue::peek`]. Unlike
/// [`Buffer`], it carries no logical reference and offers no mutable or
/// unref-capable accessors: a peek must not be able to release or mutate
/// the entry it is only inspecting.
pub struct PeekedBuffer(Arc<BufferInner>);

impl PeekedBuffer {
    /// A read-only view, identical in kind to what backend hooks receive.
    pub fn view(&self) -> BufferView<'_> {
        BufferView::from_inner(&self.0)
    }

    /// Read-only view over the payload's full capacity.
    pub fn get_cdata(&self) -> crate::buffer::DataRef<'_> {
        crate::buffer::cdata_ref(&self.0)
    }

    /// Read-only view over the user data's full capacity.
    pub fn get_cuserdata(&self) -> crate::buffer::DataRef<'_> {
        crate::buffer::cuserdata_ref(&self.0)
    }
}

impl Queue {
    /// Build a queue holding at most `capacity` entries. `capacity == 0`
    /// makes the queue unbounded, in which case `drop_when_full` is never
    /// consulted. When `drop_when_full` is set, a push against a full
    /// bounded queue evicts the oldest entry (matching a non-blocking pop)
    /// rather than failing; otherwise a push against a full queue returns
    /// `Error::TryAgain`.
    pub fn new(capacity: usize, drop_when_full: bool) -> Queue {
        Queue(Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
            }),
            condvar: Condvar::new(),
            capacity,
            drop_when_full,
            event: ReadinessEvent::new().ok(),
        }))
    }

    /// Number of entries currently queued.
    pub fn get_count(&self) -> usize {
        self.0.state.lock().items.len()
    }

    /// The readiness event signalled whenever an entry is pushed, or
    /// `None` on platforms without `eventfd` support.
    pub fn get_evt(&self) -> Option<&ReadinessEvent> {
        self.0.event.as_ref()
    }

    /// Append `buf` to the back of the queue. Takes an additional
    /// reference; the caller's own handle remains valid and must still be
    /// released separately.
    pub fn push(&self, buf: &Buffer) -> Result<()> {
        {
            let state = self.0.state.lock();
            if self.0.capacity != 0 && state.items.len() >= self.0.capacity {
                drop(state);
                if self.0.drop_when_full {
                    match self.pop(0) {
                        Ok(evicted) => {
                            if let Err(e) = evicted.buffer.unref() {
                                tracing::warn!(
                                    context = "queue_push_evict",
                                    error = %e.source,
                                    "on_last_unref failed while evicting to make room",
                                );
                            }
                        }
                        Err(Error::TryAgain { .. }) => {
                            // Raced with another consumer; queue is no
                            // longer full, proceed below.
                        }
                        Err(e) => {
                            tracing::warn!(
                                context = "queue_push_evict",
                                error = %e,
                                "non-blocking pop failed while making room for a push",
                            );
                        }
                    }
                } else {
                    return Err(Error::try_again("queue is full"));
                }
            }
        }

        buf.backend().queue_push(&buf.view())?;

        let entry = buf.add_ref().into_raw();
        let mut state = self.0.state.lock();
        let was_empty = state.items.is_empty();
        state.items.push_back(entry);
        drop(state);
        if let Some(evt) = &self.0.event {
            if let Err(e) = evt.signal() {
                tracing::warn!(context = "queue_push", error = %e, "readiness event signal failed");
            }
        }
        if was_empty {
            self.0.condvar.notify_one();
        }
        Ok(())
    }

    /// Remove and return the front entry.
    ///
    /// `timeout_ms < 0` blocks indefinitely, `== 0` returns immediately
    /// (`Error::TryAgain` if empty), `> 0` waits up to that many
    /// milliseconds. At most one wait, followed by exactly one recheck.
    pub fn pop(&self, timeout_ms: i64) -> std::result::Result<PopResult, Error> {
        let mut guard = self.0.state.lock();
        if guard.items.is_empty() {
            if timeout_ms == 0 {
                return Err(Error::try_again("queue is empty"));
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
            if guard.items.is_empty() {
                return Err(if timed_out {
                    Error::timed_out("queue wait deadline elapsed")
                } else {
                    Error::try_again("queue is empty after wait")
                });
            }
        }
        let entry = guard.items.pop_front().expect("checked non-empty");
        drop(guard);

        let buf = Buffer(Some(entry));
        let view = buf.view();
        if let Err(e) = buf.backend().queue_pop(&view, timeout_ms) {
            let _ = buf.unref();
            return Err(e);
        }
        Ok(PopResult { buffer: buf })
    }

    /// Inspect the entry at `index` (0 = front) without affecting its
    /// reference count.
    ///
    /// `timeout_ms < 0` blocks indefinitely, `== 0` returns immediately
    /// (`Error::TryAgain` if fewer than `index + 1` entries exist), `> 0`
    /// waits up to that many milliseconds. At most one wait, followed by
    /// exactly one recheck.
    pub fn peek(&self, index: usize, timeout_ms: i64) -> Result<PeekedBuffer> {
        let mut guard = self.0.state.lock();
        if guard.items.len() <= index {
            if timeout_ms == 0 {
                return Err(Error::try_again("queue has fewer entries than requested"));
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
            if guard.items.len() <= index {
                return Err(if timed_out {
                    Error::timed_out("queue wait deadline elapsed")
                } else {
                    Error::try_again("queue has fewer entries than requested after wait")
                });
            }
        }
        let entry = Arc::clone(&guard.items[index]);
        drop(guard);

        let view = BufferView::from_inner(&entry);
        entry.backend.queue_peek(&view, timeout_ms)?;
        Ok(PeekedBuffer(entry))
    }

    /// Wake every thread currently blocked in [`Queue::pop`] or
    /// [`Queue::peek`]. Each wakes, rechecks exactly once, and returns
    /// `Error::TryAgain` if its condition is still unmet. Not a persistent
    /// flag: a later call waits normally.
    pub fn abort(&self) {
        let _guard = self.0.state.lock();
        self.0.condvar.notify_all();
    }

    /// Drain every entry, releasing each buffer's queue reference. Unlike
    /// `pop`, does not call any backend hook.
    pub fn flush(&self) {
        let mut guard = self.0.state.lock();
        let items: Vec<_> = guard.items.drain(..).collect();
        drop(guard);
        for entry in items {
            drop(Buffer(Some(entry)));
        }
    }
}

/// The result of a successful [`Queue::pop`].
pub struct PopResult {
    /// The dequeued buffer, now owned by the caller.
    pub buffer: Buffer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapBackend;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn backend() -> StdArc<dyn crate::backend::Backend> {
        StdArc::new(HeapBackend)
    }

    fn new_buffer() -> Buffer {
        Buffer::new(4, 0, backend(), None).unwrap()
    }

    /// Scenario 2: queue overflow drop.
    #[test]
    fn drop_when_full_evicts_oldest() {
        let queue = Queue::new(3, true);
        let a = new_buffer();
        let b = new_buffer();
        let c = new_buffer();
        let d = new_buffer();

        queue.push(&a).unwrap();
        assert_eq!(queue.get_count(), 1);
        queue.push(&b).unwrap();
        assert_eq!(queue.get_count(), 2);
        queue.push(&c).unwrap();
        assert_eq!(queue.get_count(), 3);
        queue.push(&d).unwrap();
        assert_eq!(queue.get_count(), 3);

        let popped_b = queue.pop(0).unwrap().buffer;
        assert!(StdArc::ptr_eq(popped_b.inner(), b.inner()));
        popped_b.unref().unwrap();
        let popped_c = queue.pop(0).unwrap().buffer;
        assert!(StdArc::ptr_eq(popped_c.inner(), c.inner()));
        popped_c.unref().unwrap();
        let popped_d = queue.pop(0).unwrap().buffer;
        assert!(StdArc::ptr_eq(popped_d.inner(), d.inner()));
        popped_d.unref().unwrap();

        a.unref().unwrap();
        b.unref().unwrap();
        c.unref().unwrap();
        d.unref().unwrap();
    }

    /// Scenario 3: queue overflow refuse.
    #[test]
    fn refuses_when_full_without_drop_when_full() {
        let queue = Queue::new(2, false);
        let a = new_buffer();
        let b = new_buffer();
        let c = new_buffer();

        queue.push(&a).unwrap();
        queue.push(&b).unwrap();
        assert!(matches!(queue.push(&c), Err(Error::TryAgain { .. })));

        let popped_a = queue.pop(0).unwrap().buffer;
        assert!(StdArc::ptr_eq(popped_a.inner(), a.inner()));

        popped_a.unref().unwrap();
        a.unref().unwrap();
        b.unref().unwrap();
        c.unref().unwrap();
    }

    /// Scenario 5: abort wakes waiters.
    #[test]
    fn abort_wakes_blocked_pop() {
        let queue = Queue::new(2, false);
        let queue2 = queue.clone();
        let handle = thread::spawn(move || queue2.pop(-1));

        thread::sleep(StdDuration::from_millis(20));
        queue.abort();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::TryAgain { .. })));
    }

    #[test]
    fn peek_does_not_touch_refcount() {
        let queue = Queue::new(2, false);
        let a = new_buffer();
        queue.push(&a).unwrap();
        assert_eq!(a.ref_count(), 2);
        let peeked = queue.peek(0, 0).unwrap();
        assert_eq!(peeked.view().ref_count(), 2);
        drop(peeked);
        assert_eq!(a.ref_count(), 2);

        let popped = queue.pop(0).unwrap().buffer;
        popped.unref().unwrap();
        a.unref().unwrap();
    }

    #[test]
    fn peek_beyond_length_is_try_again() {
        let queue = Queue::new(2, false);
        let a = new_buffer();
        queue.push(&a).unwrap();
        assert!(matches!(queue.peek(1, 0), Err(Error::TryAgain { .. })));
        let popped = queue.pop(0).unwrap().buffer;
        popped.unref().unwrap();
        a.unref().unwrap();
    }

    #[test]
    fn flush_releases_every_entry_without_hooks() {
        let queue = Queue::new(4, false);
        let a = new_buffer();
        let b = new_buffer();
        queue.push(&a).unwrap();
        queue.push(&b).unwrap();
        assert_eq!(a.ref_count(), 2);
        queue.flush();
        assert_eq!(queue.get_count(), 0);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 1);
    }
}
