// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! The buffer: a reference-counted container for a payload, user data, and
//! metadata, grounded on `vbuf.c`.
//!
//! `Buffer` models the C API's explicit `vbuf_ref`/`vbuf_unref` pair as an
//! owning handle: [`Buffer::add_ref`] clones the handle (incrementing the
//! count), and [`Buffer::unref`] consumes one (decrementing it). Letting a
//! `Buffer` simply go out of scope runs the same decrement through `Drop`,
//! logging rather than propagating a backend hook failure, since `Drop`
//! cannot return a `Result`. `unref` is the explicit, fallible form; `Drop`
//! is the implicit, best-effort fallback.
//!
//! The reference count is a field independent of Rust's own `Arc` strong
//! count: `Arc<BufferInner>` only tracks how many places hold the
//! allocation alive (which includes a pool's free-list entry once the
//! logical count reaches zero), while `BufferInner::refcount` is the count
//! this crate's API contract is about.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::backend::Backend;
use crate::backend::alloc_zeroed;
use crate::error::{Error, Result};
use crate::metadata::{MetaKey, MetadataStore};
use crate::pool::{self, PoolInner};

pub(crate) struct PayloadRegion {
    pub(crate) data: Vec<u8>,
    pub(crate) size: usize,
}

pub(crate) struct BufferInner {
    pub(crate) refcount: AtomicUsize,
    pub(crate) write_locked: AtomicBool,
    pub(crate) payload: Mutex<PayloadRegion>,
    pub(crate) userdata: Mutex<PayloadRegion>,
    pub(crate) metadata: Mutex<MetadataStore>,
    pub(crate) pool: Option<Weak<PoolInner>>,
    pub(crate) backend: Arc<dyn Backend>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        // The payload is the only region the backend is responsible for;
        // user data is a direct allocation freed by ordinary `Vec` drop.
        let data = std::mem::take(&mut self.payload.lock().data);
        self.backend.release(data);
    }
}

/// An owning handle to a buffer. Cloning is explicit ([`Buffer::add_ref`]);
/// letting a handle drop releases one reference.
pub struct Buffer(pub(crate) Option<Arc<BufferInner>>);

/// A non-owning, read-only view of a buffer passed to backend hooks. Unlike
/// [`Buffer`], holding or dropping a `BufferView` has no effect on the
/// reference count.
pub struct BufferView<'a>(&'a BufferInner);

impl<'a> BufferView<'a> {
    pub(crate) fn from_inner(inner: &'a BufferInner) -> Self {
        BufferView(inner)
    }

    /// Current payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.0.payload.lock().data.len()
    }

    /// Current used-prefix length of the payload.
    pub fn size(&self) -> usize {
        self.0.payload.lock().size
    }

    /// Current user-data capacity in bytes.
    pub fn userdata_capacity(&self) -> usize {
        self.0.userdata.lock().data.len()
    }

    /// Current used-prefix length of the user data.
    pub fn userdata_size(&self) -> usize {
        self.0.userdata.lock().size
    }

    /// Snapshot of the reference count.
    pub fn ref_count(&self) -> usize {
        self.0.refcount.load(Ordering::Acquire)
    }

    /// Whether the buffer is currently write-locked.
    pub fn is_write_locked(&self) -> bool {
        self.0.write_locked.load(Ordering::SeqCst)
    }

    /// Read-only view of the payload's full capacity.
    pub fn get_cdata(&self) -> DataRef<'_> {
        cdata_ref(self.0)
    }

    /// Read-only view of the user data's full capacity.
    pub fn get_cuserdata(&self) -> DataRef<'_> {
        cuserdata_ref(self.0)
    }
}

pub(crate) fn cdata_ref(inner: &BufferInner) -> DataRef<'_> {
    DataRef {
        guard: inner.payload.lock(),
    }
}

pub(crate) fn cuserdata_ref(inner: &BufferInner) -> DataRef<'_> {
    DataRef {
        guard: inner.userdata.lock(),
    }
}

/// A scoped read-only view over a payload or user-data region, holding its
/// mutex for the duration of the borrow.
pub struct DataRef<'a> {
    guard: MutexGuard<'a, PayloadRegion>,
}

impl Deref for DataRef<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard.data
    }
}

/// A scoped writable view over a payload or user-data region, holding its
/// mutex for the duration of the borrow.
pub struct DataMut<'a> {
    guard: MutexGuard<'a, PayloadRegion>,
}

impl Deref for DataMut<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard.data
    }
}

impl DerefMut for DataMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard.data
    }
}

/// Returned by [`Buffer::unref`] when a backend's `on_last_unref` hook
/// fails: per the design, the buffer is then "neither pooled nor
/// destroyed", which in Rust terms means ownership reverts to the caller
/// instead of being silently dropped.
pub struct UnrefError {
    /// The buffer, handed back to the caller.
    pub buffer: Buffer,
    /// The hook failure that aborted the transition.
    pub source: Error,
}

impl fmt::Debug for UnrefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnrefError")
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for UnrefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unref failed: {}", self.source)
    }
}

impl std::error::Error for UnrefError {}

impl Buffer {
    /// Construct a standalone buffer, or one belonging to `pool`'s
    /// population. Initial reference count is 1.
    pub fn new(
        capacity: usize,
        userdata_capacity: usize,
        backend: Arc<dyn Backend>,
        pool: Option<crate::pool::Pool>,
    ) -> Result<Buffer> {
        let payload_data = backend.acquire(capacity)?;
        let userdata_data = match alloc_zeroed(userdata_capacity) {
            Ok(v) => v,
            Err(e) => {
                backend.release(payload_data);
                return Err(e);
            }
        };

        let inner = Arc::new(BufferInner {
            refcount: AtomicUsize::new(1),
            write_locked: AtomicBool::new(false),
            payload: Mutex::new(PayloadRegion {
                data: payload_data,
                size: 0,
            }),
            userdata: Mutex::new(PayloadRegion {
                data: userdata_data,
                size: 0,
            }),
            metadata: Mutex::new(MetadataStore::new()),
            pool: pool.map(|p| Arc::downgrade(&p.0)),
            backend,
        });

        Ok(Buffer(Some(inner)))
    }

    pub(crate) fn inner(&self) -> &Arc<BufferInner> {
        self.0.as_ref().expect("buffer used after unref")
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner().backend
    }

    /// Extract the underlying shared state without running the unref
    /// sequence. Used internally by pool/queue code when a new reference's
    /// ownership is being handed to a free list or queue entry rather than
    /// to another `Buffer` handle.
    pub(crate) fn into_raw(mut self) -> Arc<BufferInner> {
        self.0.take().expect("buffer used after unref")
    }

    /// A read-only view suitable for passing to backend hooks.
    pub fn view(&self) -> BufferView<'_> {
        BufferView(self.inner())
    }

    /// Add a reference, returning a new handle sharing the same buffer.
    pub fn add_ref(&self) -> Buffer {
        self.inner().refcount.fetch_add(1, Ordering::SeqCst);
        Buffer(Some(Arc::clone(self.inner())))
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.inner().refcount.load(Ordering::Acquire)
    }

    /// Release this reference. On transition to zero, runs the backend's
    /// `on_last_unref` hook, resets write-lock and size, destroys all
    /// metadata, and either returns the buffer to its pool or destroys it.
    ///
    /// If `on_last_unref` fails, the buffer is handed back to the caller
    /// via [`UnrefError::buffer`] rather than pooled or destroyed.
    pub fn unref(mut self) -> std::result::Result<(), UnrefError> {
        let inner = self.0.take().expect("buffer used after unref");
        match finish_unref(inner) {
            Ok(()) => Ok(()),
            Err((inner, source)) => Err(UnrefError {
                buffer: Buffer(Some(inner)),
                source,
            }),
        }
    }

    /// The pool this buffer belongs to, if any, and if it still exists.
    pub fn pool(&self) -> Option<crate::pool::Pool> {
        self.inner()
            .pool
            .as_ref()
            .and_then(|w| w.upgrade())
            .map(crate::pool::Pool)
    }

    /// Write-lock the buffer. Requires `ref_count() == 1`.
    pub fn write_lock(&self) -> Result<()> {
        if self.ref_count() != 1 {
            return Err(Error::busy("write_lock requires a reference count of 1"));
        }
        self.inner().write_locked.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Write-unlock the buffer. Requires `ref_count() == 1`.
    pub fn write_unlock(&self) -> Result<()> {
        if self.ref_count() != 1 {
            return Err(Error::busy("write_unlock requires a reference count of 1"));
        }
        self.inner().write_locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the buffer is currently write-locked.
    pub fn is_write_locked(&self) -> bool {
        self.inner().write_locked.load(Ordering::SeqCst)
    }

    /// Writable view over the payload's full capacity. Fails
    /// [`Error::PermissionDenied`] if write-locked.
    pub fn get_data(&self) -> Result<DataMut<'_>> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        Ok(DataMut {
            guard: self.inner().payload.lock(),
        })
    }

    /// Read-only view over the payload's full capacity. Always allowed.
    pub fn get_cdata(&self) -> DataRef<'_> {
        cdata_ref(self.inner())
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner().payload.lock().data.len()
    }

    /// Grow the payload's capacity. A no-op if `new_capacity` does not
    /// exceed the current capacity; never shrinks. Fails
    /// [`Error::NotSupported`] if the backend has no realloc hook, and
    /// [`Error::PermissionDenied`] if write-locked.
    pub fn set_capacity(&self, new_capacity: usize) -> Result<usize> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        let mut guard = self.inner().payload.lock();
        if new_capacity <= guard.data.len() {
            return Ok(guard.data.len());
        }
        if !self.inner().backend.supports_realloc() {
            return Err(Error::not_supported("backend has no realloc hook"));
        }
        let old_len = guard.data.len();
        match self.inner().backend.realloc(&mut guard.data, new_capacity) {
            Ok(()) => Ok(guard.data.len()),
            Err(e) => {
                guard.data.resize(old_len, 0);
                Err(e)
            }
        }
    }

    /// Used-prefix length of the payload.
    pub fn size(&self) -> usize {
        self.inner().payload.lock().size
    }

    /// Set the used-prefix length. Fails [`Error::InvalidArgument`] if
    /// `size` exceeds capacity, [`Error::PermissionDenied`] if write-locked.
    pub fn set_size(&self, size: usize) -> Result<()> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        let mut guard = self.inner().payload.lock();
        if size > guard.data.len() {
            return Err(Error::invalid_argument("size exceeds capacity"));
        }
        guard.size = size;
        Ok(())
    }

    /// Writable view over the user data's full capacity. Fails
    /// [`Error::PermissionDenied`] if write-locked.
    pub fn get_userdata(&self) -> Result<DataMut<'_>> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        Ok(DataMut {
            guard: self.inner().userdata.lock(),
        })
    }

    /// Read-only view over the user data's full capacity. Always allowed.
    pub fn get_cuserdata(&self) -> DataRef<'_> {
        cuserdata_ref(self.inner())
    }

    /// User-data capacity in bytes.
    pub fn userdata_capacity(&self) -> usize {
        self.inner().userdata.lock().data.len()
    }

    /// Grow the user-data capacity by direct reallocation (no backend hook
    /// involved). A no-op if `new_capacity` does not exceed the current
    /// capacity; never shrinks.
    pub fn set_userdata_capacity(&self, new_capacity: usize) -> Result<usize> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        let mut guard = self.inner().userdata.lock();
        if new_capacity <= guard.data.len() {
            return Ok(guard.data.len());
        }
        let additional = new_capacity - guard.data.len();
        guard
            .data
            .try_reserve(additional)
            .map_err(|_| Error::out_of_memory("user-data growth failed"))?;
        guard.data.resize(new_capacity, 0);
        Ok(guard.data.len())
    }

    /// Used-prefix length of the user data.
    pub fn userdata_size(&self) -> usize {
        self.inner().userdata.lock().size
    }

    /// Set the used-prefix length of the user data. Fails
    /// [`Error::InvalidArgument`] if `size` exceeds capacity,
    /// [`Error::PermissionDenied`] if write-locked.
    pub fn set_userdata_size(&self, size: usize) -> Result<()> {
        if self.is_write_locked() {
            return Err(Error::permission_denied("buffer is write-locked"));
        }
        let mut guard = self.inner().userdata.lock();
        if size > guard.data.len() {
            return Err(Error::invalid_argument("userdata size exceeds capacity"));
        }
        guard.size = size;
        Ok(())
    }

    /// Copy `self`'s user data into `dst`, growing `dst` if needed.
    pub fn userdata_copy(&self, dst: &Buffer) -> Result<()> {
        if Arc::ptr_eq(self.inner(), dst.inner()) {
            return Err(Error::invalid_argument("userdata_copy: src == dst"));
        }
        if dst.is_write_locked() {
            return Err(Error::permission_denied("destination is write-locked"));
        }
        let (capacity, bytes) = {
            let g = self.inner().userdata.lock();
            (g.data.len(), g.data[..g.size].to_vec())
        };
        if bytes.is_empty() {
            return Ok(());
        }
        dst.set_userdata_capacity(capacity)?;
        {
            let mut g = dst.inner().userdata.lock();
            g.data[..bytes.len()].copy_from_slice(&bytes);
        }
        dst.set_userdata_size(bytes.len())
    }

    /// Copy `self`'s payload, user data, and metadata (unfiltered) into
    /// `dst`, growing `dst`'s payload if needed.
    pub fn copy(&self, dst: &Buffer) -> Result<()> {
        if Arc::ptr_eq(self.inner(), dst.inner()) {
            return Err(Error::invalid_argument("copy: src == dst"));
        }
        if dst.is_write_locked() {
            return Err(Error::permission_denied("destination is write-locked"));
        }

        let bytes = {
            let g = self.inner().payload.lock();
            g.data[..g.size].to_vec()
        };
        if !bytes.is_empty() {
            if dst.capacity() < bytes.len() {
                dst.set_capacity(bytes.len())?;
            }
            {
                let mut g = dst.inner().payload.lock();
                g.data[..bytes.len()].copy_from_slice(&bytes);
            }
            dst.set_size(bytes.len())?;
        }

        self.userdata_copy(dst)?;
        self.metadata_copy(dst, 0)?;
        Ok(())
    }

    /// Add a new metadata record. Fails [`Error::Exists`] if `key` is
    /// already present.
    pub fn metadata_add(&self, key: MetaKey, level: u32, len: usize) -> Result<&mut [u8]> {
        let mut store = self.inner().metadata.lock();
        let slice = store.add(key, level, len)?;
        let ptr = slice.as_mut_ptr();
        let slice_len = slice.len();
        drop(store);
        // SAFETY: `add` stores record data in a `Box<[u8]>` that the store
        // never moves or resizes in place; only `metadata_remove` or buffer
        // teardown frees it. The returned slice outlives this lock guard by
        // design (per the metadata store's contract: the mutex protects the
        // collection's topology, not per-record content after return).
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, slice_len) })
    }

    /// Look up a metadata record. Fails [`Error::NoEntry`] if absent.
    pub fn metadata_get(&self, key: MetaKey) -> Result<(u32, &mut [u8])> {
        let mut store = self.inner().metadata.lock();
        let (level, slice) = store.get_mut(key)?;
        let ptr = slice.as_mut_ptr();
        let slice_len = slice.len();
        drop(store);
        // SAFETY: see `metadata_add`.
        Ok((level, unsafe {
            std::slice::from_raw_parts_mut(ptr, slice_len)
        }))
    }

    /// Remove and free a metadata record. Fails [`Error::NoEntry`] if
    /// absent.
    pub fn metadata_remove(&self, key: MetaKey) -> Result<()> {
        self.inner().metadata.lock().remove(key)
    }

    /// Copy every metadata record from `self` into `dst` whose level is
    /// strictly below `max_level` (`max_level == 0` copies everything).
    /// Fails if `self` and `dst` are the same buffer, or propagates
    /// [`Error::Exists`] if `dst` already has a colliding key.
    pub fn metadata_copy(&self, dst: &Buffer, max_level: u32) -> Result<()> {
        if Arc::ptr_eq(self.inner(), dst.inner()) {
            return Err(Error::invalid_argument("metadata_copy: src == dst"));
        }
        let snapshot: Vec<(MetaKey, u32, Vec<u8>)> = {
            let store = self.inner().metadata.lock();
            store
                .iter()
                .filter(|r| max_level == 0 || r.level() < max_level)
                .map(|r| (r.key(), r.level(), r.data_owned()))
                .collect()
        };
        let mut dst_store = dst.inner().metadata.lock();
        for (key, level, data) in snapshot {
            let slice = dst_store.add(key, level, data.len())?;
            slice.copy_from_slice(&data);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            if let Err((_, e)) = finish_unref(inner) {
                tracing::warn!(
                    context = "buffer_implicit_drop",
                    error = %e,
                    "on_last_unref hook failed during implicit drop; buffer is leaked rather than pooled or destroyed",
                );
            }
        }
    }
}

/// Decrement the reference count and, on transition to zero, run the drop
/// sequence from the data model: fire `on_last_unref`, reset write-lock and
/// size, destroy metadata, then return the buffer to its pool or let it be
/// destroyed by the ordinary `Arc`/`BufferInner` drop glue.
///
/// On `on_last_unref` failure, restores the count to 1 and hands the `Arc`
/// back to the caller alongside the error.
fn finish_unref(
    inner: Arc<BufferInner>,
) -> std::result::Result<(), (Arc<BufferInner>, Error)> {
    let prev = inner.refcount.fetch_sub(1, Ordering::SeqCst);
    if prev != 1 {
        // Still referenced elsewhere; this handle's claim is released.
        return Ok(());
    }

    let view = BufferView::from_inner(&inner);
    if let Err(e) = inner.backend.on_last_unref(&view) {
        inner.refcount.fetch_add(1, Ordering::SeqCst);
        return Err((inner, e));
    }

    inner.write_locked.store(false, Ordering::SeqCst);
    inner.payload.lock().size = 0;
    inner.metadata.lock().clear();

    if let Some(weak) = &inner.pool {
        if let Some(pool_inner) = weak.upgrade() {
            pool::pool_return(&pool_inner, inner);
            return Ok(());
        }
    }

    // Standalone, or the owning pool has already been torn down: dropping
    // `inner` here runs `BufferInner::drop`, which releases the payload
    // through the backend and frees user data/metadata as ordinary fields.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapBackend;
    use std::sync::Arc as StdArc;

    fn backend() -> Arc<dyn Backend> {
        StdArc::new(HeapBackend)
    }

    #[test]
    fn new_buffer_has_refcount_one() {
        let buf = Buffer::new(16, 0, backend(), None).unwrap();
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn add_ref_then_unref_restores_refcount() {
        let buf = Buffer::new(8, 0, backend(), None).unwrap();
        let second = buf.add_ref();
        assert_eq!(buf.ref_count(), 2);
        second.unref().unwrap();
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn set_size_rejects_overflow() {
        let buf = Buffer::new(4, 0, backend(), None).unwrap();
        assert!(matches!(
            buf.set_size(5),
            Err(Error::InvalidArgument { .. })
        ));
        buf.set_size(4).unwrap();
        assert_eq!(buf.size(), 4);
    }

    #[test]
    fn set_capacity_never_shrinks_and_grows_via_backend() {
        let buf = Buffer::new(4, 0, backend(), None).unwrap();
        assert_eq!(buf.set_capacity(2).unwrap(), 4);
        assert_eq!(buf.set_capacity(8).unwrap(), 8);
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn set_capacity_without_realloc_hook_is_not_supported() {
        struct NoRealloc;
        impl Backend for NoRealloc {
            fn acquire(&self, capacity: usize) -> Result<Vec<u8>> {
                Ok(vec![0u8; capacity])
            }
        }
        let buf = Buffer::new(2, 0, StdArc::new(NoRealloc), None).unwrap();
        assert!(matches!(
            buf.set_capacity(10),
            Err(Error::NotSupported { .. })
        ));
    }

    /// Scenario 4: write-lock guards.
    #[test]
    fn write_lock_guards_access_and_requires_sole_reference() {
        let buf = Buffer::new(8, 0, backend(), None).unwrap();
        buf.get_data().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.write_lock().unwrap();
        assert!(matches!(
            buf.get_data(),
            Err(Error::PermissionDenied { .. })
        ));
        assert_eq!(&buf.get_cdata()[..4], &[1, 2, 3, 4]);

        let second = buf.add_ref();
        assert!(matches!(buf.write_unlock(), Err(Error::Busy { .. })));
        second.unref().unwrap();
        buf.write_unlock().unwrap();
        assert!(!buf.is_write_locked());
    }

    #[test]
    fn write_lock_requires_sole_reference_to_set() {
        let buf = Buffer::new(4, 0, backend(), None).unwrap();
        let second = buf.add_ref();
        assert!(matches!(buf.write_lock(), Err(Error::Busy { .. })));
        second.unref().unwrap();
        buf.write_lock().unwrap();
    }

    /// Copy round-trip law from the design's "Laws" section.
    #[test]
    fn copy_round_trip_duplicates_payload_userdata_and_metadata() {
        let src = Buffer::new(8, 4, backend(), None).unwrap();
        src.get_data().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
        src.set_size(4).unwrap();
        src.get_userdata().unwrap()[..2].copy_from_slice(&[9, 9]);
        src.set_userdata_size(2).unwrap();
        src.metadata_add(1, 0, 2).unwrap().copy_from_slice(&[5, 6]);

        let dst = Buffer::new(0, 0, backend(), None).unwrap();
        src.copy(&dst).unwrap();

        assert_eq!(dst.size(), 4);
        assert_eq!(&dst.get_cdata()[..4], &[1, 2, 3, 4]);
        assert_eq!(dst.userdata_size(), 2);
        assert_eq!(&dst.get_cuserdata()[..2], &[9, 9]);
        let (level, data) = dst.metadata_get(1).unwrap();
        assert_eq!(level, 0);
        assert_eq!(data, &[5, 6]);
    }

    #[test]
    fn copy_rejects_self_copy() {
        let buf = Buffer::new(4, 0, backend(), None).unwrap();
        assert!(matches!(buf.copy(&buf), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn metadata_round_trip_through_buffer() {
        let buf = Buffer::new(4, 0, backend(), None).unwrap();
        buf.metadata_add(7, 1, 3).unwrap().copy_from_slice(&[1, 2, 3]);
        let (level, data) = buf.metadata_get(7).unwrap();
        assert_eq!(level, 1);
        assert_eq!(data, &[1, 2, 3]);
        buf.metadata_remove(7).unwrap();
        assert!(matches!(buf.metadata_get(7), Err(Error::NoEntry { .. })));
    }

    #[test]
    fn on_last_unref_failure_returns_buffer_to_caller() {
        struct FailingUnref;
        impl Backend for FailingUnref {
            fn acquire(&self, capacity: usize) -> Result<Vec<u8>> {
                Ok(vec![0u8; capacity])
            }
            fn on_last_unref(&self, _buf: &BufferView<'_>) -> Result<()> {
                Err(Error::invalid_argument("hook refuses to release"))
            }
        }
        let buf = Buffer::new(4, 0, StdArc::new(FailingUnref), None).unwrap();
        let err = buf.unref().unwrap_err();
        assert_eq!(err.buffer.ref_count(), 1);
    }
}
