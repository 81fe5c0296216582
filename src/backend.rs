// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! The backend capability set: the pluggable collaborator that performs
//! actual payload memory acquisition/release for a buffer, plus optional
//! notification hooks a backend can use to observe a buffer's lifecycle.
//!
//! Only [`Backend::acquire`] and [`Backend::release`] are mandatory; every
//! other hook has a no-op default so a minimal backend can implement just
//! those two methods. [`HeapBackend`] is the trivial instance: a plain heap
//! allocator with no notification hooks, grounded directly on
//! `vbuf_generic.c`'s `vbuf_generic_get_cbs`.

use crate::buffer::BufferView;
use crate::error::{Error, Result};

/// Grows `data` to `len` bytes, zero-filled, using a fallible reservation so
/// an allocation failure surfaces as [`Error::OutOfMemory`] instead of
/// aborting the process (the failure mode `Vec::with_capacity` cannot report
/// on stable Rust).
pub(crate) fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::out_of_memory(format!("failed to allocate {len} bytes")))?;
    v.resize(len, 0);
    Ok(v)
}

/// The capability set a buffer is bound to at construction.
///
/// Implementations must be `Send + Sync`: pool and queue hooks are invoked
/// with the owning pool/queue mutex released (see the crate-level docs), so
/// a hook may run on whichever thread happens to perform the triggering
/// operation.
pub trait Backend: Send + Sync {
    /// Allocate the payload region for a new buffer. Must return exactly
    /// `capacity` bytes.
    fn acquire(&self, capacity: usize) -> Result<Vec<u8>>;

    /// Release a payload region during buffer destruction. The default
    /// simply drops the allocation; override for backends with external
    /// resources (mmap regions, DMA handles, etc).
    fn release(&self, data: Vec<u8>) {
        drop(data);
    }

    /// Whether [`Backend::realloc`] is implemented. `set_capacity` growth
    /// requests fail `NotSupported` when this returns `false`.
    fn supports_realloc(&self) -> bool {
        false
    }

    /// Grow `data` in place to `new_capacity` bytes. Only called when
    /// `new_capacity` exceeds the buffer's current capacity.
    fn realloc(&self, data: &mut Vec<u8>, new_capacity: usize) -> Result<()> {
        let _ = (data, new_capacity);
        Err(Error::not_supported("backend has no realloc hook"))
    }

    /// Called when a buffer's reference count transitions to zero, before
    /// the buffer is reset and returned to its pool or destroyed. A failure
    /// here leaves the buffer neither pooled nor destroyed.
    fn on_last_unref(&self, buf: &BufferView<'_>) -> Result<()> {
        let _ = buf;
        Ok(())
    }

    /// Called after a buffer has been removed from a pool's free list, with
    /// the pool's mutex released.
    fn pool_get(&self, buf: &BufferView<'_>, timeout_ms: i64) -> Result<()> {
        let _ = (buf, timeout_ms);
        Ok(())
    }

    /// Called before a buffer re-enters a pool's free list. A failure is
    /// logged; the buffer is still returned regardless.
    fn pool_put(&self, buf: &BufferView<'_>) -> Result<()> {
        let _ = buf;
        Ok(())
    }

    /// Called before a buffer is appended to a queue, with the queue's
    /// mutex released. A failure aborts the push.
    fn queue_push(&self, buf: &BufferView<'_>) -> Result<()> {
        let _ = buf;
        Ok(())
    }

    /// Called after a queue entry has been located for `peek`, with the
    /// queue's mutex released.
    fn queue_peek(&self, buf: &BufferView<'_>, timeout_ms: i64) -> Result<()> {
        let _ = (buf, timeout_ms);
        Ok(())
    }

    /// Called after a buffer has been detached from a queue for `pop`, with
    /// the queue's mutex released. A failure releases the caller's inherited
    /// reference on their behalf and propagates the error.
    fn queue_pop(&self, buf: &BufferView<'_>, timeout_ms: i64) -> Result<()> {
        let _ = (buf, timeout_ms);
        Ok(())
    }
}

/// The trivial backend: a plain heap allocator with no notification hooks,
/// grounded on `vbuf_generic.c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBackend;

impl Backend for HeapBackend {
    fn acquire(&self, capacity: usize) -> Result<Vec<u8>> {
        alloc_zeroed(capacity)
    }

    fn release(&self, data: Vec<u8>) {
        drop(data);
    }

    fn supports_realloc(&self) -> bool {
        true
    }

    fn realloc(&self, data: &mut Vec<u8>, new_capacity: usize) -> Result<()> {
        let grown = alloc_zeroed(new_capacity)?;
        let mut grown = grown;
        grown[..data.len()].copy_from_slice(data);
        *data = grown;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_backend_acquire_is_zeroed() {
        let backend = HeapBackend;
        let data = backend.acquire(16).unwrap();
        assert_eq!(data.len(), 16);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn heap_backend_realloc_grows_and_preserves_prefix() {
        let backend = HeapBackend;
        let mut data = backend.acquire(4).unwrap();
        data.copy_from_slice(&[1, 2, 3, 4]);
        backend.realloc(&mut data, 8).unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
        assert_eq!(&data[4..], &[0, 0, 0, 0]);
    }

    struct NoReallocBackend;
    impl Backend for NoReallocBackend {
        fn acquire(&self, capacity: usize) -> Result<Vec<u8>> {
            alloc_zeroed(capacity)
        }
    }

    #[test]
    fn default_backend_rejects_realloc() {
        let backend = NoReallocBackend;
        assert!(!backend.supports_realloc());
        let mut data = vec![0u8; 4];
        assert!(matches!(
            backend.realloc(&mut data, 8),
            Err(Error::NotSupported { .. })
        ));
    }
}
