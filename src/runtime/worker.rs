use crate::arena::{self, ScratchArena};
use crate::io;
use crate::runtime::{BALANCE_CHECK_INTERVAL, PREEMPT_BUDGET, STEAL_ATTEMPTS, Shared};
use crate::task::{SuspendReason, Task, TaskState, current};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(Debug)]
pub(crate) struct Worker {
    index: usize,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(index: usize, shared: Arc<Shared>) -> Self {
        Self { index, shared }
    }

    pub(crate) fn run(self) {
        if self.shared.cfg.pin_workers {
            pin_to_cpu(self.index);
        }
        arena::install_scratch(Rc::new(ScratchArena::with_capacity(
            self.shared.cfg.scratch_capacity,
        )));
        tracing::debug!(worker = self.index, "worker online");

        let mut last_balance_check = Instant::now();
        loop {
            if !self.shared.is_running() {
                break;
            }

            if let Some(task) = self.shared.queues[self.index].pop() {
                self.run_task(task);
                continue;
            }

            if self.try_steal() {
                continue;
            }

            if last_balance_check.elapsed() >= BALANCE_CHECK_INTERVAL {
                self.shared.balance_load();
                last_balance_check = Instant::now();
            }

            self.shared.sleep_worker(self.index);
        }

        arena::clear_scratch();
        tracing::debug!(worker = self.index, "worker exiting");
    }

    /// Mount the task, resume it to its next suspension point, and requeue
    /// it according to the reason it suspended.
    fn run_task(&self, mut task: Task) {
        let ctx = Arc::clone(task.ctx());
        ctx.set_state(TaskState::Running);
        ctx.set_suspend_reason(SuspendReason::None);
        let started_ns = self.shared.now_ns();
        ctx.mark_resumed(started_ns);

        let poll = {
            let _guard = current::enter(Arc::clone(&ctx));
            panic::catch_unwind(AssertUnwindSafe(|| task.resume()))
        };

        self.shared.stats.per_worker_executed[self.index].fetch_add(1, Ordering::Relaxed);
        self.shared
            .stats
            .context_switches
            .fetch_add(1, Ordering::Relaxed);

        let poll = match poll {
            Ok(poll) => poll,
            // A failure inside a task terminates that task only; the worker
            // keeps serving.
            Err(_) => {
                tracing::error!(task = %ctx.id(), worker = self.index, "task panicked");
                ctx.set_state(TaskState::Completed);
                ctx.set_suspend_reason(SuspendReason::Completed);
                self.shared.loads[self.index].fetch_sub(1, Ordering::Relaxed);
                return;
            }
        };

        if poll.is_ready() {
            ctx.set_state(TaskState::Completed);
            ctx.set_suspend_reason(SuspendReason::Completed);
            self.shared.loads[self.index].fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let reason = match ctx.suspend_reason() {
            // Suspended at a point that never filed a reason (some foreign
            // future): requeue locally and poll again.
            SuspendReason::None => SuspendReason::Preempted,
            // A long run is noted as preemption at the voluntary yield, and
            // keeps the task from migrating to a fresh worker right away.
            SuspendReason::Yield
                if self.shared.now_ns() - started_ns > PREEMPT_BUDGET.as_nanos() as u64 =>
            {
                SuspendReason::Preempted
            }
            reason => reason,
        };

        match reason {
            SuspendReason::ParkForIo => self.park_task(task),
            SuspendReason::Yield => {
                ctx.set_state(TaskState::Yielded);
                self.shared.loads[self.index].fetch_sub(1, Ordering::Relaxed);
                self.shared.schedule(task);
            }
            SuspendReason::Preempted => self.requeue_local(task),
            SuspendReason::None | SuspendReason::Completed => unreachable!(),
        }
    }

    /// Hand a suspended task over to the parking table and arm the reactor.
    /// The entry must exist before the registration can fire.
    fn park_task(&self, task: Task) {
        let ctx = Arc::clone(task.ctx());
        let Some((fd, interest)) = ctx.take_park_request() else {
            // Reason said park but no request was filed; self-heal by
            // treating it as a preemption.
            self.requeue_local(task);
            return;
        };

        ctx.set_state(TaskState::ParkedForIo);
        self.shared.loads[self.index].fetch_sub(1, Ordering::Relaxed);
        self.shared
            .stats
            .total_io_parked
            .fetch_add(1, Ordering::Relaxed);

        match self.shared.table.insert(fd, interest, task) {
            Ok(()) => self.shared.reactor.add(fd, interest),
            Err(task) => {
                debug_assert!(false, "two tasks awaiting fd {fd}");
                tracing::error!(fd = fd as i64, task = %task.id(), "two tasks awaiting one fd");
                task.ctx().set_io_result(io::ALREADY_PARKED);
                self.shared.schedule(task);
            }
        }
    }

    fn requeue_local(&self, task: Task) {
        task.ctx().set_state(TaskState::Ready);
        if let Err(task) = self.shared.queues[self.index].push(task) {
            // Own ring full; give it to the general placement path.
            self.shared.loads[self.index].fetch_sub(1, Ordering::Relaxed);
            self.shared.schedule(task);
        }
    }

    /// Probe a few random victims and run the first stolen task right away.
    fn try_steal(&self) -> bool {
        let workers = self.shared.worker_count();
        if workers <= 1 {
            return false;
        }

        for _ in 0..STEAL_ATTEMPTS {
            let victim = fastrand::usize(..workers);
            if victim == self.index {
                continue;
            }
            if let Some(task) = self.shared.queues[victim].pop() {
                self.shared.loads[victim].fetch_sub(1, Ordering::Relaxed);
                self.shared.loads[self.index].fetch_add(1, Ordering::Relaxed);
                self.shared.stats.steals.fetch_add(1, Ordering::Relaxed);
                self.run_task(task);
                return true;
            }
        }
        false
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(index: usize) {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    // Failure here (more workers than CPUs, restricted cpuset) leaves the
    // thread unpinned, which is the specified fallback.
    if set.set(index).is_ok() {
        let _ = sched_setaffinity(Pid::from_raw(0), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_index: usize) {}
