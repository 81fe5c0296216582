// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Edge-triggered readiness events, for wiring a pool or queue into an
//! external `poll`/`epoll`-style event loop instead of polling or blocking.
//!
//! Grounded on the original's `pomp_evt_new`/`pomp_evt_signal` pair: a
//! single file descriptor that becomes readable when signaled and stays
//! readable until drained, coalescing any number of signals raised before
//! the last drain into one readable edge.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{Error, Result};

/// A coalescing, edge-triggered readiness signal backed by a Linux
/// `eventfd`. Cloning a [`crate::pool::Pool`] or [`crate::queue::Queue`]
/// does not clone its event; obtain the file descriptor once and register
/// it with the caller's event loop.
pub struct ReadinessEvent {
    fd: OwnedFd,
}

impl ReadinessEvent {
    /// Create a new, unsignaled event.
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<ReadinessEvent> {
        // SAFETY: `eventfd` with `EFD_NONBLOCK` returns either a valid,
        // freshly-owned file descriptor or -1; no other precondition.
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(Error::out_of_memory("eventfd creation failed"));
        }
        // SAFETY: `raw` was just returned by `eventfd` and is not owned
        // elsewhere.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(ReadinessEvent { fd })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new() -> Result<ReadinessEvent> {
        Err(Error::not_supported(
            "readiness events require eventfd, which is only available on linux",
        ))
    }

    /// Raise the readiness edge. Multiple signals before a drain coalesce
    /// into a single readable state, matching `pomp_evt_signal`'s
    /// "level stays up until cleared" contract.
    #[cfg(target_os = "linux")]
    pub fn signal(&self) -> Result<()> {
        let one: u64 = 1;
        // SAFETY: `self.fd` is a valid eventfd for the lifetime of `self`;
        // the 8-byte buffer matches eventfd's required write size.
        let res = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            // EAGAIN means the counter is already saturated, i.e. already
            // signaled: that is success, not failure, for a coalescing
            // level signal.
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(Error::out_of_memory(format!("eventfd write failed: {err}")));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn signal(&self) -> Result<()> {
        unreachable!("ReadinessEvent::new fails on this platform before one can be signaled")
    }

    /// Clear the readiness edge. Callers drain after waking so the next
    /// signal produces a fresh edge rather than an immediate re-wake.
    #[cfg(target_os = "linux")]
    pub fn clear(&self) -> Result<()> {
        let mut buf: u64 = 0;
        // SAFETY: see `signal`.
        let res = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if res < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                // Nothing to drain; already clear.
                return Ok(());
            }
            return Err(Error::out_of_memory(format!("eventfd read failed: {err}")));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn clear(&self) -> Result<()> {
        unreachable!("ReadinessEvent::new fails on this platform before one can be cleared")
    }

    /// The underlying file descriptor, for registration with an external
    /// event loop. Remains valid for the lifetime of this `ReadinessEvent`.
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn signal_then_clear_round_trips() {
        let evt = ReadinessEvent::new().unwrap();
        evt.signal().unwrap();
        evt.signal().unwrap();
        evt.clear().unwrap();
        // A second clear with nothing pending is a no-op, not an error.
        evt.clear().unwrap();
    }

    #[test]
    fn fd_is_stable_across_signals() {
        let evt = ReadinessEvent::new().unwrap();
        let fd = evt.as_raw_fd();
        evt.signal().unwrap();
        assert_eq!(evt.as_raw_fd(), fd);
    }
}
