//! A work-stealing runtime for cooperatively scheduled virtual threads.
//!
//! Tasks are lightweight resumable computations executed by a fixed pool of
//! CPU-pinned worker threads. A task runs until it either completes or
//! suspends at one of two primitives: [`io::readiness`], which parks the
//! task until the OS reports a file descriptor ready, or [`io::yield_now`],
//! which hands the worker back to the scheduler. Parked tasks are resumed by
//! a reactor thread that multiplexes readiness events through the platform's
//! native interface (io_uring on Linux, kqueue on BSD/macOS, I/O completion
//! ports on Windows) and re-queues them through the normal submit path.
//!
//! ```no_run
//! filament::start(4).unwrap();
//! filament::submit(async {
//!     // non-blocking socket work via filament::net
//! });
//! filament::stop();
//! ```

pub mod arena;

pub mod io;

#[cfg(unix)]
pub mod net;

pub mod runtime;
pub use runtime::{Builder, Scheduler, SchedulerStats};
pub use runtime::{handle, start, stats, stop, submit, submit_with_affinity};

pub mod reactor;
pub use reactor::Interest;

pub(crate) mod park;

pub(crate) mod queue;

pub(crate) mod task;
