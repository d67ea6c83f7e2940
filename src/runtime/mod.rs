//! Scheduler core: worker loops, placement, stealing, load balancing, and
//! lifecycle, plus the process-wide instance.

use anyhow::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

mod builder;
pub use builder::Builder;
pub(crate) use builder::RuntimeConfig;

mod scheduler;
pub use scheduler::Scheduler;
pub(crate) use scheduler::Shared;

mod stats;
pub use stats::SchedulerStats;
pub(crate) use stats::Stats;

mod worker;

/// Victim queues probed per stealing round.
pub(crate) const STEAL_ATTEMPTS: usize = 4;

/// A single `resume` running longer than this marks the task preempted at
/// its next voluntary suspension.
pub(crate) const PREEMPT_BUDGET: Duration = Duration::from_millis(10);

/// How often an idle worker considers rebalancing.
pub(crate) const BALANCE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Minimum spacing between actual rebalance passes.
pub(crate) const BALANCE_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Load spread beyond which a task is migrated (and below which an affinity
/// hint is honored).
pub(crate) const IMBALANCE_THRESHOLD: u32 = 2;

/// Worker condvar park timeout; missed wakeups self-heal within this bound.
pub(crate) const WORKER_PARK_TIMEOUT: Duration = Duration::from_millis(10);

/// Reactor wait granularity; bounds shutdown latency for the reactor thread.
pub(crate) const REACTOR_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

static GLOBAL: Mutex<Option<Arc<Scheduler>>> = Mutex::new(None);

/// Start the process-wide scheduler with `workers` worker threads (0 means
/// one per available CPU). Fails if it is already running.
pub fn start(workers: usize) -> Result<()> {
    let mut slot = GLOBAL.lock();
    if slot.is_some() {
        return Err(anyhow::anyhow!("scheduler is already running"));
    }

    let mut builder = Builder::new();
    if workers > 0 {
        builder = builder.worker_threads(workers);
    }
    *slot = Some(Arc::new(builder.try_start()?));
    Ok(())
}

/// The process-wide scheduler, started with defaults on first use.
pub fn handle() -> Arc<Scheduler> {
    let mut slot = GLOBAL.lock();
    if let Some(scheduler) = slot.as_ref() {
        return Arc::clone(scheduler);
    }

    let scheduler = Arc::new(
        Builder::new()
            .try_start()
            .expect("failed to start the process-wide scheduler"),
    );
    *slot = Some(Arc::clone(&scheduler));
    scheduler
}

/// Stop the process-wide scheduler: destroy parked tasks, join every
/// runtime thread, tear down the reactor. Idempotent; a later [`start`] or
/// [`handle`] builds a fresh instance.
pub fn stop() {
    let taken = GLOBAL.lock().take();
    if let Some(scheduler) = taken {
        scheduler.shutdown();
    }
}

/// Submit a task to the process-wide scheduler. Submitting without a
/// running scheduler is a caller bug: it aborts in debug builds and is
/// logged and dropped in release builds.
pub fn submit<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match GLOBAL.lock().as_ref() {
        Some(scheduler) => scheduler.submit(future),
        None => {
            debug_assert!(false, "submit() without a running scheduler");
            tracing::warn!("submit() without a running scheduler; task dropped");
        }
    }
}

/// Like [`submit`], but place the task on `worker` (clamped to the pool).
pub fn submit_with_affinity<F>(future: F, worker: usize)
where
    F: Future<Output = ()> + Send + 'static,
{
    match GLOBAL.lock().as_ref() {
        Some(scheduler) => scheduler.submit_with_affinity(future, worker),
        None => {
            debug_assert!(false, "submit_with_affinity() without a running scheduler");
            tracing::warn!("submit_with_affinity() without a running scheduler; task dropped");
        }
    }
}

/// Counters of the process-wide scheduler, `None` when it is not running.
pub fn stats() -> Option<SchedulerStats> {
    GLOBAL.lock().as_ref().map(|scheduler| scheduler.stats())
}
