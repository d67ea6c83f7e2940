use crate::io::NOT_IN_TASK;
use crate::reactor::{Interest, RawFd};
use crate::task::current;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspend the current task until `fd` reports `interest`.
///
/// Resolves to the backend's result code: non-negative readiness data on
/// success, a negative errno on failure — `-ETIMEDOUT` when the parked wait
/// outlived the configured I/O timeout, `-ECANCELED` when the scheduler shut
/// down underneath it. Would-block and interrupts never surface here; the
/// socket adapter retries those internally.
pub fn readiness(fd: RawFd, interest: Interest) -> Readiness {
    Readiness {
        fd,
        interest,
        armed: false,
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Readiness {
    fd: RawFd,
    interest: Interest,
    armed: bool,
}

impl Future for Readiness {
    type Output = i32;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();

        if me.armed {
            match current::with_current(|ctx| ctx.take_io_result()) {
                Some(Some(result)) => return Poll::Ready(result),
                // Requeued without a stashed result: re-arm below.
                Some(None) => {}
                None => return Poll::Ready(NOT_IN_TASK),
            }
        }

        match current::with_current(|ctx| ctx.request_park(me.fd, me.interest)) {
            Some(()) => {
                me.armed = true;
                Poll::Pending
            }
            None => {
                debug_assert!(false, "readiness() awaited outside a runtime task");
                tracing::error!(fd = me.fd as i64, "readiness() awaited outside a runtime task");
                Poll::Ready(NOT_IN_TASK)
            }
        }
    }
}
