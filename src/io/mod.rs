//! The two suspension points a task may block at: fd readiness and the
//! cooperative yield. Everything else a task does runs synchronously on its
//! current worker.

mod readiness;
pub use readiness::{Readiness, readiness};

mod yield_now;
pub use yield_now::{YieldNow, yield_now};

pub use crate::reactor::Interest;

// Result codes a readiness await can resolve to besides backend data.
// Negative errno on unix, negative winsock/win32 codes on Windows.

/// Awaited outside a runtime task.
#[cfg(unix)]
pub(crate) const NOT_IN_TASK: i32 = -libc::ENOTSUP;
#[cfg(windows)]
pub(crate) const NOT_IN_TASK: i32 = -10045;

/// The parked wait outlived the configured I/O timeout.
#[cfg(unix)]
pub(crate) const TIMED_OUT: i32 = -libc::ETIMEDOUT;
#[cfg(windows)]
pub(crate) const TIMED_OUT: i32 = -10060;

/// The scheduler shut down while the task was parked.
#[cfg(unix)]
pub(crate) const CANCELED: i32 = -libc::ECANCELED;
#[cfg(windows)]
pub(crate) const CANCELED: i32 = -995;

/// Another task is already parked on the same fd.
#[cfg(unix)]
pub(crate) const ALREADY_PARKED: i32 = -libc::EEXIST;
#[cfg(windows)]
pub(crate) const ALREADY_PARKED: i32 = -183;
