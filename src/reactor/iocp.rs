//! Windows backend: sockets are associated with one completion port, keyed
//! by their handle value, and readiness is reported by draining queued
//! completion packets. The doorbell is a posted packet with a reserved key.
//!
//! Completion ports do not carry a readable/writable distinction, so a
//! dequeued packet reports both classes and the consumer's non-blocking
//! retry sorts out which direction actually progressed, the same contract
//! as the other backends' level-oriented surface.

use crate::reactor::{Completion, Interest, RawFd};
use std::io;
use std::ptr;
use std::time::Duration;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED, PostQueuedCompletionStatus,
};

/// Completion key reserved for the doorbell.
const WAKE_KEY: usize = usize::MAX;

#[derive(Debug)]
pub(crate) struct Backend {
    port: HANDLE,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Doorbell {
    port: HANDLE,
}

// Safety: a completion port handle is a kernel object usable from any
// thread; the port is closed only when the backend drops, which outlives
// every doorbell (both live inside the same Reactor).
unsafe impl Send for Backend {}
unsafe impl Send for Doorbell {}
unsafe impl Sync for Doorbell {}

impl Doorbell {
    pub(crate) fn ring(&self) {
        unsafe {
            PostQueuedCompletionStatus(self.port, 0, WAKE_KEY, ptr::null_mut());
        }
    }
}

impl Backend {
    pub(crate) fn new() -> io::Result<(Self, Doorbell)> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok((Self { port }, Doorbell { port }))
    }

    pub(crate) fn apply_add(&mut self, fd: RawFd, _interest: Interest) -> io::Result<()> {
        let ret = unsafe { CreateIoCompletionPort(fd as HANDLE, self.port, fd, 0) };
        if ret.is_null() {
            let err = io::Error::last_os_error();
            // Re-associating an already-associated handle is the level
            // re-arm path, not a failure.
            if err.raw_os_error() != Some(87) {
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn apply_remove(&mut self, _fd: RawFd) {
        // Packets stop arriving once the handle closes; there is no
        // disassociate call to make.
    }

    pub(crate) fn wait(&mut self, out: &mut Vec<Completion>, timeout: Duration) -> io::Result<()> {
        let mut timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;

        loop {
            let mut bytes: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut bytes,
                    &mut key,
                    &mut overlapped,
                    timeout_ms,
                )
            };

            if ok == 0 {
                if overlapped.is_null() {
                    // Timeout with nothing dequeued.
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                out.push(Completion {
                    fd: key as RawFd,
                    readiness: Interest::empty(),
                    result: -err.raw_os_error().unwrap_or(1),
                });
            } else if key != WAKE_KEY {
                out.push(Completion {
                    fd: key as RawFd,
                    readiness: Interest::READABLE | Interest::WRITABLE,
                    result: bytes as i32,
                });
            } else if out.is_empty() {
                // Pure doorbell: report the empty round immediately.
                return Ok(());
            }

            // Opportunistically drain whatever else is queued.
            timeout_ms = 0;
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}
