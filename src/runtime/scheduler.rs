use crate::io;
use crate::park::ParkingTable;
use crate::queue::RunQueue;
use crate::reactor::Reactor;
use crate::runtime::worker::Worker;
use crate::runtime::{
    BALANCE_MIN_INTERVAL, IMBALANCE_THRESHOLD, REACTOR_WAIT_TIMEOUT, RuntimeConfig, SchedulerStats,
    Stats, WORKER_PARK_TIMEOUT,
};
use crate::task::{Task, TaskState};
use anyhow::{Context as _, Result};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Instant;

/// A running scheduler instance: `N` CPU-pinned workers, one reactor
/// thread, one expiry-sweep thread. Most programs use the process-wide
/// instance through [`crate::start`]/[`crate::submit`]; embedding and tests
/// run instances directly.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn start(cfg: RuntimeConfig) -> Result<Self> {
        let reactor = Reactor::new().context("failed to set up the readiness reactor")?;
        let shared = Arc::new(Shared::new(cfg, reactor));
        let workers = shared.worker_count();

        let mut threads = Vec::with_capacity(workers + 2);
        for index in 0..workers {
            let worker = Worker::new(index, Arc::clone(&shared));
            let handle = thread::Builder::new()
                .name(format!("filament-worker-{index}"))
                .spawn(move || worker.run())
                .context("failed to spawn worker thread")?;
            threads.push(handle);
        }

        let reactor_shared = Arc::clone(&shared);
        threads.push(
            thread::Builder::new()
                .name("filament-reactor".into())
                .spawn(move || reactor_loop(reactor_shared))
                .context("failed to spawn reactor thread")?,
        );

        let sweep_shared = Arc::clone(&shared);
        threads.push(
            thread::Builder::new()
                .name("filament-sweep".into())
                .spawn(move || sweep_loop(sweep_shared))
                .context("failed to spawn sweep thread")?,
        );

        tracing::info!(workers, "scheduler online");

        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Submit a task; it is placed on the least-loaded worker.
    pub fn submit<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug_assert!(self.shared.is_running(), "submit() after stop");
        self.shared.schedule(Task::new(future));
    }

    /// Submit a task onto `worker` (clamped to the pool size). The index is
    /// also remembered as the task's advisory affinity for later
    /// resumptions.
    pub fn submit_with_affinity<F>(&self, future: F, worker: usize)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug_assert!(self.shared.is_running(), "submit_with_affinity() after stop");
        let worker = worker.min(self.shared.worker_count() - 1);
        let task = Task::new(future);
        task.ctx().set_affinity(worker);
        self.shared.schedule_to(task, worker);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.snapshot()
    }

    /// Number of tasks currently parked on I/O.
    pub fn pending_io(&self) -> usize {
        self.shared.table.len()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stop the scheduler: signal every thread, join them, destroy parked
    /// and queued tasks, tear down the reactor. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for index in 0..self.shared.worker_count() {
            self.shared.wake_worker(index);
        }
        self.shared.reactor.notify();

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }

        // Parked tasks are destroyed without resumption; the stashed code
        // distinguishes teardown from I/O failure for anyone holding the
        // task context.
        for (fd, task) in self.shared.table.drain() {
            task.ctx().set_io_result(io::CANCELED);
            tracing::debug!(fd = fd as i64, task = %task.id(), "dropping parked task at shutdown");
            drop(task);
        }
        for queue in &self.shared.queues {
            while let Some(task) = queue.pop() {
                drop(task);
            }
        }

        tracing::info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct WorkerParker {
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

/// State shared by the workers, the reactor thread, the sweep thread, and
/// every submitter.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) cfg: RuntimeConfig,
    pub(crate) running: AtomicBool,
    pub(crate) queues: Vec<RunQueue<Task>>,
    pub(crate) loads: Vec<AtomicU32>,
    parkers: Vec<WorkerParker>,
    pub(crate) table: ParkingTable,
    pub(crate) reactor: Reactor,
    pub(crate) stats: Stats,
    epoch: Instant,
    last_balance: Mutex<Instant>,
}

impl Shared {
    pub(crate) fn new(cfg: RuntimeConfig, reactor: Reactor) -> Self {
        let workers = cfg.worker_threads;
        Self {
            running: AtomicBool::new(true),
            queues: (0..workers)
                .map(|_| RunQueue::with_capacity(cfg.run_queue_capacity))
                .collect(),
            loads: (0..workers).map(|_| AtomicU32::new(0)).collect(),
            parkers: (0..workers)
                .map(|_| WorkerParker {
                    sleeping: Mutex::new(false),
                    condvar: Condvar::new(),
                })
                .collect(),
            table: ParkingTable::new(),
            reactor,
            stats: Stats::new(workers),
            epoch: Instant::now(),
            last_balance: Mutex::new(Instant::now()),
            cfg,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Place a task on the least-loaded worker, honoring its advisory
    /// affinity while the pool is roughly balanced.
    pub(crate) fn schedule(&self, task: Task) {
        if !self.is_running() {
            tracing::debug!(task = %task.id(), "dropping task scheduled after stop");
            return;
        }
        let worker = self.select_worker(task.ctx().affinity());
        self.push_task(task, worker);
    }

    /// Place a task on `worker` unconditionally (queue-full fallback aside).
    pub(crate) fn schedule_to(&self, task: Task, worker: usize) {
        if !self.is_running() {
            tracing::debug!(task = %task.id(), "dropping task scheduled after stop");
            return;
        }
        self.push_task(task, worker.min(self.worker_count() - 1));
    }

    fn select_worker(&self, hint: Option<usize>) -> usize {
        let mut min_index = 0;
        let mut min_load = u32::MAX;
        for (index, load) in self.loads.iter().enumerate() {
            let load = load.load(Ordering::Relaxed);
            if load < min_load {
                min_load = load;
                min_index = index;
            }
        }

        if let Some(preferred) = hint {
            let preferred = preferred.min(self.worker_count() - 1);
            let load = self.loads[preferred].load(Ordering::Relaxed);
            if load.saturating_sub(min_load) <= IMBALANCE_THRESHOLD {
                return preferred;
            }
        }
        min_index
    }

    fn push_task(&self, task: Task, preferred: usize) {
        task.ctx().set_state(TaskState::Ready);
        let mut task = task;
        loop {
            match self.try_push(task, preferred) {
                Ok(worker) => {
                    self.loads[worker].fetch_add(1, Ordering::Relaxed);
                    self.stats.total_scheduled.fetch_add(1, Ordering::Relaxed);
                    self.wake_worker(worker);
                    return;
                }
                Err(returned) => {
                    // Every ring is full: block the submitter until a worker
                    // drains something.
                    if !self.is_running() {
                        return;
                    }
                    task = returned;
                    thread::yield_now();
                }
            }
        }
    }

    /// Try the preferred ring, then the rest in ascending load order.
    fn try_push(&self, task: Task, preferred: usize) -> Result<usize, Task> {
        let mut task = match self.queues[preferred].push(task) {
            Ok(()) => return Ok(preferred),
            Err(task) => task,
        };

        let mut order = (0..self.worker_count())
            .filter(|&w| w != preferred)
            .collect::<Vec<_>>();
        order.sort_by_key(|&w| self.loads[w].load(Ordering::Relaxed));

        for worker in order {
            task = match self.queues[worker].push(task) {
                Ok(()) => return Ok(worker),
                Err(task) => task,
            };
        }
        Err(task)
    }

    pub(crate) fn wake_worker(&self, worker: usize) {
        let parker = &self.parkers[worker];
        let mut sleeping = parker.sleeping.lock();
        if *sleeping {
            *sleeping = false;
            parker.condvar.notify_one();
        }
    }

    /// Park the calling worker until woken or the self-heal timeout lapses.
    pub(crate) fn sleep_worker(&self, worker: usize) {
        let parker = &self.parkers[worker];
        let mut sleeping = parker.sleeping.lock();
        if !self.is_running() {
            return;
        }
        *sleeping = true;
        parker
            .condvar
            .wait_for(&mut sleeping, WORKER_PARK_TIMEOUT);
        *sleeping = false;
    }

    /// Move one task from the most- to the least-loaded worker when the
    /// spread exceeds the threshold. Rate-limited across all callers.
    pub(crate) fn balance_load(&self) {
        {
            let mut last = self.last_balance.lock();
            if last.elapsed() < BALANCE_MIN_INTERVAL {
                return;
            }
            *last = Instant::now();
        }

        let mut max_index = 0;
        let mut max_load = 0;
        let mut min_index = 0;
        let mut min_load = u32::MAX;
        for (index, load) in self.loads.iter().enumerate() {
            let load = load.load(Ordering::Relaxed);
            if load > max_load {
                max_load = load;
                max_index = index;
            }
            if load < min_load {
                min_load = load;
                min_index = index;
            }
        }

        if max_load > min_load + IMBALANCE_THRESHOLD
            && let Some(task) = self.queues[max_index].pop()
        {
            self.loads[max_index].fetch_sub(1, Ordering::Relaxed);
            match self.queues[min_index].push(task) {
                Ok(()) => {
                    self.loads[min_index].fetch_add(1, Ordering::Relaxed);
                    self.wake_worker(min_index);
                }
                // Receiver filled up meanwhile; fall back to the general
                // placement path.
                Err(task) => self.schedule(task),
            }
        }
    }
}

/// Drives the reactor: applies registrations, waits for readiness, and
/// hands resumed tasks back through the normal submit path. Task code never
/// runs on this thread — resuming here would re-enter user code under the
/// reactor's locks.
fn reactor_loop(shared: Arc<Shared>) {
    let mut completions = Vec::with_capacity(64);

    while shared.is_running() {
        if let Err(e) = shared.reactor.wait(&mut completions, REACTOR_WAIT_TIMEOUT) {
            tracing::warn!(error = %e, "reactor wait failed");
            thread::sleep(std::time::Duration::from_millis(1));
            continue;
        }

        for completion in completions.drain(..) {
            // No parking entry means a late event for a registration that
            // was already revoked; drop it.
            let Some(task) = shared.table.complete(completion.fd) else {
                continue;
            };
            tracing::trace!(
                fd = completion.fd as i64,
                readiness = ?completion.readiness,
                result = completion.result,
                task = %task.id(),
                "resuming parked task"
            );
            shared.reactor.remove(completion.fd);
            task.ctx().set_io_result(completion.result);
            task.ctx().set_state(TaskState::Ready);
            shared.stats.total_resumed.fetch_add(1, Ordering::Relaxed);
            shared.schedule(task);
        }
    }
}

/// Destroys parked waits that outlived the configured I/O timeout.
fn sweep_loop(shared: Arc<Shared>) {
    while shared.is_running() {
        thread::sleep(shared.cfg.sweep_interval);
        if !shared.is_running() {
            break;
        }

        for (fd, task) in shared.table.expire_older_than(shared.cfg.io_timeout) {
            shared.reactor.remove(fd);
            task.ctx().set_io_result(io::TIMED_OUT);
            shared.stats.io_expired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fd = fd as i64, task = %task.id(), "parked i/o timed out");
            drop(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Scheduler: Send, Sync);
    assert_impl_all!(Shared: Send, Sync);

    fn test_shared(workers: usize, queue_capacity: usize) -> Shared {
        let cfg = RuntimeConfig::try_from(
            crate::Builder::new()
                .worker_threads(workers)
                .run_queue_capacity(queue_capacity),
        )
        .unwrap();
        Shared::new(cfg, Reactor::new().unwrap())
    }

    fn idle_task() -> Task {
        Task::new(async {})
    }

    #[test]
    fn placement_prefers_lowest_load_with_lowest_index_ties() {
        let shared = test_shared(4, 8);
        shared.loads[0].store(3, Ordering::Relaxed);
        shared.loads[1].store(1, Ordering::Relaxed);
        shared.loads[2].store(1, Ordering::Relaxed);
        shared.loads[3].store(2, Ordering::Relaxed);

        assert_eq!(shared.select_worker(None), 1);
    }

    #[test]
    fn affinity_hint_is_honored_until_imbalanced() {
        let shared = test_shared(4, 8);
        shared.loads[2].store(IMBALANCE_THRESHOLD, Ordering::Relaxed);
        assert_eq!(shared.select_worker(Some(2)), 2);

        shared.loads[2].store(IMBALANCE_THRESHOLD + 1, Ordering::Relaxed);
        assert_eq!(shared.select_worker(Some(2)), 0);
    }

    #[test]
    fn schedule_to_clamps_the_worker_index() {
        let shared = test_shared(2, 8);
        shared.schedule_to(idle_task(), 99);
        assert_eq!(shared.queues[1].len(), 1);
        assert_eq!(shared.loads[1].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn full_ring_falls_over_to_another_worker() {
        let shared = test_shared(2, 1);
        shared.schedule_to(idle_task(), 0);
        shared.schedule_to(idle_task(), 0);

        assert_eq!(shared.queues[0].len(), 1);
        assert_eq!(shared.queues[1].len(), 1);
    }

    #[test]
    fn scheduling_after_stop_drops_the_task() {
        let shared = test_shared(1, 8);
        shared.running.store(false, Ordering::SeqCst);
        shared.schedule(idle_task());
        assert!(shared.queues[0].is_empty());
        assert_eq!(shared.stats.snapshot().total_scheduled, 0);
    }

    #[test]
    fn balance_moves_one_task_across_the_spread() {
        let shared = test_shared(2, 8);
        for _ in 0..4 {
            shared.schedule_to(idle_task(), 0);
        }
        assert_eq!(shared.queues[0].len(), 4);

        // Back-date the rate limiter so the pass runs.
        *shared.last_balance.lock() = Instant::now() - BALANCE_MIN_INTERVAL * 2;
        shared.balance_load();

        assert_eq!(shared.queues[0].len(), 3);
        assert_eq!(shared.queues[1].len(), 1);
        assert_eq!(shared.loads[0].load(Ordering::Relaxed), 3);
        assert_eq!(shared.loads[1].load(Ordering::Relaxed), 1);
    }
}
