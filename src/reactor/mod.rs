//! Readiness reactor: one uniform surface over the platform multiplexers.
//!
//! The scheduler owns a single reactor shared by every worker. Registration
//! traffic (`add`/`modify`/`remove`) is queued lock-free and applied by the
//! thread blocked in [`Reactor::wait`], which each call precedes with a
//! drain of the op queue; a backend doorbell makes sure a fresh registration
//! or a shutdown interrupts a blocked wait. Keeping all syscalls that touch
//! the backend on the waiting thread is what lets the io_uring backend run
//! with a single submitter, and costs the others nothing.
//!
//! Semantics are level-oriented: a completion means "the fd is ready now",
//! the consumer performs non-blocking syscalls until would-block and
//! re-registers if it needs more. Registrations are armed once per await and
//! revoked on resumption; every backend tolerates revoking a registration
//! that already fired.

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::io;
use std::time::Duration;

#[cfg(unix)]
pub use std::os::fd::RawFd;

/// Windows keys registrations by the socket handle value.
#[cfg(windows)]
pub type RawFd = usize;

#[cfg(target_os = "linux")]
#[path = "uring.rs"]
mod sys;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
#[path = "kqueue.rs"]
mod sys;

#[cfg(windows)]
#[path = "iocp.rs"]
mod sys;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    windows
)))]
compile_error!("no readiness backend for this platform");

bitflags::bitflags! {
    /// The readiness classes a registration can wait for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

/// One readiness event. `result` is non-negative backend data (poll revents
/// on Linux, pending byte count on kqueue, transferred bytes on Windows) or
/// a negative errno.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    pub(crate) fd: RawFd,
    pub(crate) readiness: Interest,
    pub(crate) result: i32,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add { fd: RawFd, interest: Interest },
    Remove { fd: RawFd },
}

#[derive(Debug)]
pub(crate) struct Reactor {
    ops: SegQueue<Op>,
    doorbell: sys::Doorbell,
    backend: Mutex<sys::Backend>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        let (backend, doorbell) = sys::Backend::new()?;
        Ok(Self {
            ops: SegQueue::new(),
            doorbell,
            backend: Mutex::new(backend),
        })
    }

    /// Arm a registration for `fd`. Applied by the next `wait`; failures
    /// surface there as a completion carrying the negative errno.
    pub(crate) fn add(&self, fd: RawFd, interest: Interest) {
        self.ops.push(Op::Add { fd, interest });
        self.doorbell.ring();
    }

    pub(crate) fn modify(&self, fd: RawFd, interest: Interest) {
        self.ops.push(Op::Remove { fd });
        self.ops.push(Op::Add { fd, interest });
        self.doorbell.ring();
    }

    /// Revoke the registration for `fd`. Quietly ignored when the
    /// registration already fired or never existed.
    pub(crate) fn remove(&self, fd: RawFd) {
        self.ops.push(Op::Remove { fd });
        self.doorbell.ring();
    }

    /// Interrupt a blocked `wait` without queueing any work.
    pub(crate) fn notify(&self) {
        self.doorbell.ring();
    }

    /// Apply queued registrations, then block until at least one completion
    /// arrives, the doorbell rings, or `timeout` elapses. `out` is replaced
    /// with this round's completions; empty means timeout or doorbell.
    pub(crate) fn wait(&self, out: &mut Vec<Completion>, timeout: Duration) -> io::Result<()> {
        out.clear();
        let mut backend = self.backend.lock();

        while let Some(op) = self.ops.pop() {
            match op {
                Op::Add { fd, interest } => {
                    if let Err(e) = backend.apply_add(fd, interest) {
                        // Resource exhaustion belongs to the awaiting task,
                        // not the reactor; report it through the completion
                        // path as a negative result.
                        out.push(Completion {
                            fd,
                            readiness: Interest::empty(),
                            result: -e.raw_os_error().unwrap_or(libc_enomem()),
                        });
                    }
                }
                Op::Remove { fd } => backend.apply_remove(fd),
            }
        }

        backend.wait(out, timeout)
    }
}

#[cfg(unix)]
fn libc_enomem() -> i32 {
    libc::ENOMEM
}

#[cfg(windows)]
fn libc_enomem() -> i32 {
    12
}
