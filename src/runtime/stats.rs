use std::sync::atomic::{AtomicU64, Ordering};

/// Monotone scheduler counters. Updated with relaxed atomics; readers may
/// observe slightly stale values but never a decrease.
#[derive(Debug)]
pub(crate) struct Stats {
    pub(crate) total_scheduled: AtomicU64,
    pub(crate) total_io_parked: AtomicU64,
    pub(crate) total_resumed: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) context_switches: AtomicU64,
    pub(crate) io_expired: AtomicU64,
    pub(crate) per_worker_executed: Vec<AtomicU64>,
}

impl Stats {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            total_scheduled: AtomicU64::new(0),
            total_io_parked: AtomicU64::new(0),
            total_resumed: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            io_expired: AtomicU64::new(0),
            per_worker_executed: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            total_io_parked: self.total_io_parked.load(Ordering::Relaxed),
            total_resumed: self.total_resumed.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            io_expired: self.io_expired.load(Ordering::Relaxed),
            per_worker_executed: self
                .per_worker_executed
                .iter()
                .map(|count| count.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// A point-in-time snapshot of the scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Placements into a run queue: submissions, yield requeues, and
    /// resumptions after parked I/O.
    pub total_scheduled: u64,
    /// Tasks suspended on fd readiness.
    pub total_io_parked: u64,
    /// Parked tasks handed back to a run queue by the reactor.
    pub total_resumed: u64,
    /// Tasks taken from another worker's queue.
    pub steals: u64,
    /// Completed `resume` calls across all workers.
    pub context_switches: u64,
    /// Parked waits destroyed by the expiry sweep.
    pub io_expired: u64,
    /// Completed `resume` calls per worker; sums to `context_switches`.
    pub per_worker_executed: Vec<u64>,
}
