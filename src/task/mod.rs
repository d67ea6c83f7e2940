//! The virtual thread: a resumable computation plus its scheduling context.
//!
//! A [`Task`] owns the boxed future and is never cloned — at any instant it
//! lives in exactly one of a run queue, the parking table, or the stack
//! frame of the worker resuming it. The [`TaskContext`] travels separately
//! by `Arc` so the suspension primitives (running inside `resume`, when the
//! worker holds the task) and the reactor/sweep threads (holding the parked
//! task) can read and write scheduling state without touching ownership.

use crate::reactor::{Interest, RawFd};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};

pub(crate) mod current;

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Stable task identity, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TaskState {
    Ready = 0,
    Running = 1,
    ParkedForIo = 2,
    Yielded = 3,
    Completed = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::ParkedForIo,
            3 => Self::Yielded,
            _ => Self::Completed,
        }
    }
}

/// Why the most recent `resume` returned without completing. Written by the
/// suspension primitives through the current-task cell, read back by the
/// worker to decide requeueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SuspendReason {
    None = 0,
    ParkForIo = 1,
    Yield = 2,
    Completed = 3,
    Preempted = 4,
}

impl SuspendReason {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::ParkForIo,
            2 => Self::Yield,
            3 => Self::Completed,
            4 => Self::Preempted,
            _ => Self::None,
        }
    }
}

/// Sentinel for "no stashed I/O result".
const NO_RESULT: i64 = i64::MIN;

/// Sentinel for "no parked fd" / "no affinity hint".
const NO_FD: i64 = -1;
const NO_AFFINITY: i32 = -1;

#[derive(Debug)]
pub(crate) struct TaskContext {
    id: TaskId,
    state: AtomicU8,
    suspend_reason: AtomicU8,

    /// Pending park request filed by the readiness primitive, consumed by
    /// the worker right after `resume` returns.
    park_fd: AtomicI64,
    park_interest: AtomicU8,

    /// Result code stashed by the reactor, the sweep, or teardown; consumed
    /// by the readiness primitive on the resumed poll.
    io_result: AtomicI64,

    /// Nanoseconds since the scheduler's epoch at the last mount.
    last_resumed_ns: AtomicU64,

    /// Advisory preferred worker, `NO_AFFINITY` when unset.
    affinity: AtomicI32,
}

impl TaskContext {
    fn new() -> Self {
        Self {
            id: TaskId::next(),
            state: AtomicU8::new(TaskState::Ready as u8),
            suspend_reason: AtomicU8::new(SuspendReason::None as u8),
            park_fd: AtomicI64::new(NO_FD),
            park_interest: AtomicU8::new(0),
            io_result: AtomicI64::new(NO_RESULT),
            last_resumed_ns: AtomicU64::new(0),
            affinity: AtomicI32::new(NO_AFFINITY),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn suspend_reason(&self) -> SuspendReason {
        SuspendReason::from_u8(self.suspend_reason.load(Ordering::Acquire))
    }

    pub(crate) fn set_suspend_reason(&self, reason: SuspendReason) {
        self.suspend_reason.store(reason as u8, Ordering::Release);
    }

    /// File a park request: the next return from `resume` suspends this
    /// task on `fd` until the reactor reports `interest`.
    pub(crate) fn request_park(&self, fd: RawFd, interest: Interest) {
        self.park_fd.store(fd as i64, Ordering::Relaxed);
        self.park_interest.store(interest.bits(), Ordering::Relaxed);
        self.set_suspend_reason(SuspendReason::ParkForIo);
    }

    pub(crate) fn take_park_request(&self) -> Option<(RawFd, Interest)> {
        let fd = self.park_fd.swap(NO_FD, Ordering::Relaxed);
        if fd == NO_FD {
            return None;
        }
        let interest = Interest::from_bits_truncate(self.park_interest.load(Ordering::Relaxed));
        Some((fd as RawFd, interest))
    }

    pub(crate) fn set_io_result(&self, result: i32) {
        self.io_result.store(result as i64, Ordering::Release);
    }

    pub(crate) fn take_io_result(&self) -> Option<i32> {
        match self.io_result.swap(NO_RESULT, Ordering::AcqRel) {
            NO_RESULT => None,
            result => Some(result as i32),
        }
    }

    pub(crate) fn mark_resumed(&self, now_ns: u64) {
        self.last_resumed_ns.store(now_ns, Ordering::Relaxed);
    }

    pub(crate) fn last_resumed_ns(&self) -> u64 {
        self.last_resumed_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn set_affinity(&self, worker: usize) {
        self.affinity.store(worker as i32, Ordering::Relaxed);
    }

    pub(crate) fn affinity(&self) -> Option<usize> {
        match self.affinity.load(Ordering::Relaxed) {
            NO_AFFINITY => None,
            worker => Some(worker as usize),
        }
    }
}

/// The owning handle. Moves between the run queues, the parking table, and
/// the executing worker; dropping it is the destroy operation.
pub(crate) struct Task {
    ctx: Arc<TaskContext>,
    future: TaskFuture,
}

impl Task {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            ctx: Arc::new(TaskContext::new()),
            future: Box::pin(future),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.ctx.id
    }

    pub(crate) fn ctx(&self) -> &Arc<TaskContext> {
        &self.ctx
    }

    /// Run the task until its next suspension point or completion. Wakeups
    /// do not travel through the waker — a suspended task is resumed by the
    /// reactor or the scheduler re-queueing its handle — so the context
    /// carries a no-op waker.
    pub(crate) fn resume(&mut self) -> Poll<()> {
        let waker = current::noop_waker();
        let mut cx = Context::from_waker(&waker);
        self.future.as_mut().poll(&mut cx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.ctx.id)
            .field("state", &self.ctx.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Task: Send);
    assert_impl_all!(TaskContext: Send, Sync);

    #[test]
    fn ids_are_unique_and_monotone() {
        let a = Task::new(async {});
        let b = Task::new(async {});
        assert!(b.id().as_u64() > a.id().as_u64());
    }

    #[test]
    fn resume_drives_future_to_completion() {
        let mut task = Task::new(async {});
        assert_eq!(task.resume(), Poll::Ready(()));
    }

    #[test]
    fn park_request_round_trip() {
        let task = Task::new(async {});
        let ctx = task.ctx();
        assert_eq!(ctx.take_park_request(), None);

        ctx.request_park(7, Interest::READABLE);
        assert_eq!(ctx.suspend_reason(), SuspendReason::ParkForIo);
        assert_eq!(ctx.take_park_request(), Some((7, Interest::READABLE)));
        assert_eq!(ctx.take_park_request(), None);
    }

    #[test]
    fn io_result_is_consumed_once() {
        let task = Task::new(async {});
        let ctx = task.ctx();
        assert_eq!(ctx.take_io_result(), None);

        ctx.set_io_result(-11);
        assert_eq!(ctx.take_io_result(), Some(-11));
        assert_eq!(ctx.take_io_result(), None);
    }

    #[test]
    fn affinity_hint_defaults_to_unset() {
        let task = Task::new(async {});
        assert_eq!(task.ctx().affinity(), None);
        task.ctx().set_affinity(3);
        assert_eq!(task.ctx().affinity(), Some(3));
    }
}
