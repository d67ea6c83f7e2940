//! Thread-local cell naming the task the current worker is resuming.
//!
//! The suspension primitives run inside `resume`, while the worker owns the
//! task handle; this cell is how they reach the task's context to file a
//! suspend reason or a park request.

use crate::task::TaskContext;
use std::cell::RefCell;
use std::ptr;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskContext>>> = const { RefCell::new(None) };
}

/// Marks `ctx` as the task being resumed on this thread for the lifetime of
/// the returned guard.
pub(crate) fn enter(ctx: Arc<TaskContext>) -> CurrentGuard {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(ctx));
    CurrentGuard { _priv: () }
}

pub(crate) struct CurrentGuard {
    _priv: (),
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = None);
    }
}

/// Run `f` against the context of the task currently being resumed on this
/// thread. `None` when the caller is not inside a task.
pub(crate) fn with_current<R>(f: impl FnOnce(&TaskContext) -> R) -> Option<R> {
    CURRENT
        .with(|cell| cell.borrow().as_ref().map(Arc::clone))
        .map(|ctx| f(&ctx))
}

const NOOP_VTABLE: RawWakerVTable =
    RawWakerVTable::new(|_| noop_raw_waker(), |_| {}, |_| {}, |_| {});

fn noop_raw_waker() -> RawWaker {
    RawWaker::new(ptr::null(), &NOOP_VTABLE)
}

pub(crate) fn noop_waker() -> Waker {
    // Safety: every vtable entry is a no-op over a null pointer.
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn current_is_scoped_to_the_guard() {
        assert_eq!(with_current(|_| ()), None);

        let task = Task::new(async {});
        {
            let _guard = enter(Arc::clone(task.ctx()));
            assert_eq!(with_current(|ctx| ctx.id()), Some(task.id()));
        }

        assert_eq!(with_current(|_| ()), None);
    }

    #[test]
    fn noop_waker_survives_clone_and_wake() {
        let waker = noop_waker();
        let clone = waker.clone();
        waker.wake_by_ref();
        clone.wake();
    }
}
