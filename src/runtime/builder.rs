use crate::arena::DEFAULT_SCRATCH_CAPACITY;
use crate::runtime::Scheduler;
use anyhow::{Result, anyhow};
use std::thread;
use std::time::Duration;

const DEFAULT_RUN_QUEUE_CAPACITY: usize = 1024;

/// How long a task may stay parked on one fd before the sweep destroys it.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Configures and starts a [`Scheduler`].
///
/// ```no_run
/// use filament::Builder;
///
/// let scheduler = Builder::new()
///     .worker_threads(8)
///     .io_timeout(std::time::Duration::from_secs(10))
///     .try_start()
///     .unwrap();
/// # drop(scheduler);
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    /// Defaults to one worker per available CPU.
    worker_threads: Option<usize>,

    run_queue_capacity: usize,

    io_timeout: Duration,

    sweep_interval: Duration,

    /// Pin worker `i` to CPU `i`. Pinning is best-effort: platforms without
    /// an affinity interface run unpinned, which is not an error.
    pin_workers: bool,

    scratch_capacity: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            run_queue_capacity: DEFAULT_RUN_QUEUE_CAPACITY,
            io_timeout: DEFAULT_IO_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            pin_workers: true,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
        }
    }

    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    #[track_caller]
    pub fn run_queue_capacity(mut self, val: usize) -> Self {
        assert!(val > 0, "run queue capacity cannot be set to 0");
        self.run_queue_capacity = val;
        self
    }

    pub fn io_timeout(mut self, val: Duration) -> Self {
        self.io_timeout = val;
        self
    }

    pub fn sweep_interval(mut self, val: Duration) -> Self {
        self.sweep_interval = val;
        self
    }

    pub fn pin_workers(mut self, val: bool) -> Self {
        self.pin_workers = val;
        self
    }

    pub fn scratch_capacity(mut self, val: usize) -> Self {
        self.scratch_capacity = val;
        self
    }

    /// Spawn the worker, reactor, and sweep threads and hand back the
    /// running scheduler.
    pub fn try_start(self) -> Result<Scheduler> {
        Scheduler::start(self.try_into()?)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) run_queue_capacity: usize,
    pub(crate) io_timeout: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) pin_workers: bool,
    pub(crate) scratch_capacity: usize,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(anyhow!("worker_threads must be greater than 0"));
        }
        if self.run_queue_capacity == 0 {
            return Err(anyhow!("run_queue_capacity must be greater than 0"));
        }
        if self.io_timeout < self.sweep_interval {
            return Err(anyhow!(
                "io_timeout ({:?}) must not be shorter than sweep_interval ({:?})",
                self.io_timeout,
                self.sweep_interval
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(anyhow!("sweep_interval must be non-zero"));
        }
        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            run_queue_capacity: builder.run_queue_capacity,
            io_timeout: builder.io_timeout,
            sweep_interval: builder.sweep_interval,
            pin_workers: builder.pin_workers,
            scratch_capacity: builder.scratch_capacity,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // The config crosses into every spawned worker thread.
    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);

    #[test]
    fn defaults_resolve_to_available_parallelism() {
        let cfg = RuntimeConfig::try_from(Builder::new()).unwrap();
        assert!(cfg.worker_threads >= 1);
        assert_eq!(cfg.run_queue_capacity, DEFAULT_RUN_QUEUE_CAPACITY);
        assert_eq!(cfg.io_timeout, DEFAULT_IO_TIMEOUT);
    }

    #[test]
    fn rejects_io_timeout_below_sweep_interval() {
        let builder = Builder::new()
            .io_timeout(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(100));
        assert!(RuntimeConfig::try_from(builder).is_err());
    }

    #[test]
    #[should_panic(expected = "worker threads cannot be set to 0")]
    fn zero_workers_panics() {
        let _ = Builder::new().worker_threads(0);
    }
}
