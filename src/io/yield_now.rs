use crate::task::{SuspendReason, current};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Hand the worker back to the scheduler and rejoin the ready pool. The
/// scheduler is free to resume the task on a different worker.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        if me.yielded {
            return Poll::Ready(());
        }

        me.yielded = true;
        current::with_current(|ctx| ctx.set_suspend_reason(SuspendReason::Yield));
        // Inside the runtime the reason drives requeueing and the waker is
        // inert; waking here keeps the future usable under foreign executors.
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
