//! Linux backend: io_uring poll-add submissions, completions harvested from
//! the CQ. The doorbell is an eventfd kept armed with its own poll-add; a
//! write from any thread posts a completion that unblocks the waiter.

use crate::reactor::{Completion, Interest, RawFd};
use io_uring::types::{SubmitArgs, Timespec};
use io_uring::{IoUring, opcode, types};
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

const RING_ENTRIES: u32 = 256;

/// user_data for the doorbell's poll-add.
const DOORBELL_TOKEN: u64 = u64::MAX;

/// user_data for poll-remove submissions themselves.
const CANCEL_TOKEN: u64 = u64::MAX - 1;

pub(crate) struct Backend {
    ring: IoUring,
    doorbell_fd: Arc<OwnedFd>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("ring_fd", &self.ring.as_raw_fd())
            .field("doorbell_fd", &self.doorbell_fd)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Doorbell {
    fd: Arc<OwnedFd>,
}

impl Doorbell {
    pub(crate) fn ring(&self) {
        let buf = 1u64.to_ne_bytes();
        // A full counter (EAGAIN) already guarantees a pending wakeup.
        unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            );
        }
    }
}

impl Backend {
    pub(crate) fn new() -> io::Result<(Self, Doorbell)> {
        let ring = IoUring::new(RING_ENTRIES)?;

        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: raw is a freshly created, unowned eventfd.
        let fd = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });

        let mut backend = Self {
            ring,
            doorbell_fd: Arc::clone(&fd),
        };
        backend.arm_doorbell()?;
        backend.ring.submit()?;

        Ok((backend, Doorbell { fd }))
    }

    pub(crate) fn apply_add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let entry = opcode::PollAdd::new(types::Fd(fd), poll_flags(interest))
            .build()
            .user_data(fd as u64);
        self.push_entry(entry)
    }

    pub(crate) fn apply_remove(&mut self, fd: RawFd) {
        let entry = opcode::PollRemove::new(fd as u64)
            .build()
            .user_data(CANCEL_TOKEN);
        // Nothing to revoke is the common case once the poll has fired.
        let _ = self.push_entry(entry);
    }

    pub(crate) fn wait(&mut self, out: &mut Vec<Completion>, timeout: Duration) -> io::Result<()> {
        self.ring.submission().sync();

        let ts = Timespec::from(timeout);
        let args = SubmitArgs::new().timespec(&ts);
        match self.ring.submitter().submit_with_args(1, &args) {
            Ok(_) => {}
            // ETIME is the timeout itself; EINTR a signal; EBUSY a full CQ
            // that the drain below clears. All leave the drain meaningful.
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY)
                ) => {}
            Err(e) => return Err(e),
        }

        let cqes: SmallVec<[io_uring::cqueue::Entry; 32]> = self.ring.completion().collect();

        let mut rearm = false;
        for cqe in cqes {
            match cqe.user_data() {
                DOORBELL_TOKEN => {
                    self.drain_doorbell();
                    rearm = true;
                }
                CANCEL_TOKEN => {}
                data => {
                    let result = cqe.result();
                    let readiness = if result >= 0 {
                        interest_from_poll(result as u32)
                    } else {
                        Interest::empty()
                    };
                    out.push(Completion {
                        fd: data as RawFd,
                        readiness,
                        result,
                    });
                }
            }
        }

        if rearm {
            self.arm_doorbell()?;
            self.ring.submit()?;
        }

        Ok(())
    }

    fn arm_doorbell(&mut self) -> io::Result<()> {
        let entry = opcode::PollAdd::new(
            types::Fd(self.doorbell_fd.as_raw_fd()),
            libc::POLLIN as u32,
        )
        .build()
        .user_data(DOORBELL_TOKEN);
        self.push_entry(entry)
    }

    fn drain_doorbell(&self) {
        let mut buf = [0u8; 8];
        loop {
            let n = unsafe {
                libc::read(
                    self.doorbell_fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    fn push_entry(&mut self, entry: io_uring::squeue::Entry) -> io::Result<()> {
        // Safety: poll-add/poll-remove entries reference no application
        // memory beyond the call.
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return Ok(());
        }
        // SQ full: flush to the kernel and retry once.
        self.ring.submit()?;
        unsafe { self.ring.submission().push(&entry) }
            .map_err(|_| io::Error::from_raw_os_error(libc::ENOSPC))
    }
}

fn poll_flags(interest: Interest) -> u32 {
    let mut flags = 0;
    if interest.contains(Interest::READABLE) {
        flags |= libc::POLLIN as u32;
    }
    if interest.contains(Interest::WRITABLE) {
        flags |= libc::POLLOUT as u32;
    }
    flags
}

fn interest_from_poll(revents: u32) -> Interest {
    let mut interest = Interest::empty();
    if revents & libc::POLLIN as u32 != 0 {
        interest |= Interest::READABLE;
    }
    if revents & libc::POLLOUT as u32 != 0 {
        interest |= Interest::WRITABLE;
    }
    interest
}
