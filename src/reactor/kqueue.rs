//! BSD/macOS backend: paired EVFILT_READ/EVFILT_WRITE registrations, with
//! an EVFILT_USER event as the doorbell.

use crate::reactor::{Completion, Interest, RawFd};
use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_ERROR, EVFILT_READ, EVFILT_USER, EVFILT_WRITE,
    NOTE_TRIGGER, c_long, kevent, kqueue, time_t, timespec,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;
use std::{mem, ptr};

const EVENT_BATCH: usize = 64;

/// Doorbell ident; fds are small non-negative integers and never collide.
const WAKE_IDENT: usize = usize::MAX;

// The kevent struct grew platform-specific trailing fields (FreeBSD's
// `ext`), so events are zero-initialized and filled field by field.
fn make_event(ident: usize, filter: i16, flags: u16, fflags: u32) -> kevent {
    let mut ev: kevent = unsafe { mem::zeroed() };
    ev.ident = ident;
    ev.filter = filter;
    ev.flags = flags;
    ev.fflags = fflags;
    ev
}

pub(crate) struct Backend {
    kq: Arc<OwnedFd>,
    events: Vec<kevent>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("kq", &self.kq).finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Doorbell {
    kq: Arc<OwnedFd>,
}

impl Doorbell {
    pub(crate) fn ring(&self) {
        let trigger = make_event(WAKE_IDENT, EVFILT_USER, 0, NOTE_TRIGGER);
        unsafe {
            kevent(
                self.kq.as_raw_fd(),
                &trigger,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            );
        }
    }
}

impl Backend {
    pub(crate) fn new() -> io::Result<(Self, Doorbell)> {
        let raw = unsafe { kqueue() };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: raw is a freshly created, unowned kqueue descriptor.
        let kq = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });

        let register = make_event(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_ENABLE | EV_CLEAR, 0);
        let ret = unsafe {
            kevent(
                kq.as_raw_fd(),
                &register,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok((
            Self {
                kq: Arc::clone(&kq),
                events: Vec::with_capacity(EVENT_BATCH),
            },
            Doorbell { kq },
        ))
    }

    pub(crate) fn apply_add(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut changes = [make_event(0, 0, 0, 0); 2];
        let mut n = 0;
        if interest.contains(Interest::READABLE) {
            changes[n] = make_event(fd as usize, EVFILT_READ, EV_ADD | EV_ENABLE, 0);
            n += 1;
        }
        if interest.contains(Interest::WRITABLE) {
            changes[n] = make_event(fd as usize, EVFILT_WRITE, EV_ADD | EV_ENABLE, 0);
            n += 1;
        }

        let ret = unsafe {
            kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                n as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn apply_remove(&mut self, fd: RawFd) {
        // The fd may have been registered for either filter or neither by
        // the time the revoke lands; delete both and ignore ENOENT.
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let change = make_event(fd as usize, filter, EV_DELETE, 0);
            unsafe {
                kevent(
                    self.kq.as_raw_fd(),
                    &change,
                    1,
                    ptr::null_mut(),
                    0,
                    ptr::null(),
                );
            }
        }
    }

    pub(crate) fn wait(&mut self, out: &mut Vec<Completion>, timeout: Duration) -> io::Result<()> {
        let ts = timespec {
            tv_sec: timeout.as_secs() as time_t,
            tv_nsec: timeout.subsec_nanos() as c_long,
        };

        let n = unsafe {
            self.events.set_len(0);
            kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                &ts,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        // Safety: the kernel filled exactly n entries.
        unsafe { self.events.set_len(n as usize) };

        for event in &self.events {
            if event.filter == EVFILT_USER {
                continue;
            }

            let fd = event.ident as RawFd;
            let (readiness, result) = if event.flags & EV_ERROR != 0 {
                (Interest::empty(), -(event.data as i32))
            } else {
                let readiness = match event.filter {
                    EVFILT_READ => Interest::READABLE,
                    EVFILT_WRITE => Interest::WRITABLE,
                    _ => Interest::empty(),
                };
                (readiness, event.data as i32)
            };

            out.push(Completion {
                fd,
                readiness,
                result,
            });
        }

        Ok(())
    }
}
