//! The parking table: suspended-for-I/O tasks, keyed by the fd they wait
//! on. The entry owns the task handle, so the table is the single place a
//! parked task lives; resumption, expiry, and teardown all go through a
//! removal here before the task can run or drop.

use crate::reactor::{Interest, RawFd};
use crate::task::Task;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Parked {
    task: Task,
    #[allow(dead_code)]
    interest: Interest,
    since: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct ParkingTable {
    entries: Mutex<HashMap<RawFd, Parked>>,
}

impl ParkingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Deposit a task waiting on `fd`. An occupied slot means two tasks
    /// awaited the same fd — a caller bug; the task is handed back.
    pub(crate) fn insert(&self, fd: RawFd, interest: Interest, task: Task) -> Result<(), Task> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&fd) {
            return Err(task);
        }
        entries.insert(
            fd,
            Parked {
                task,
                interest,
                since: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove and return the task parked on `fd`. `None` means a late
    /// completion for a registration already revoked; callers drop it.
    pub(crate) fn complete(&self, fd: RawFd) -> Option<Task> {
        self.entries.lock().remove(&fd).map(|parked| parked.task)
    }

    /// Remove every entry parked longer than `max_age`.
    pub(crate) fn expire_older_than(&self, max_age: Duration) -> Vec<(RawFd, Task)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = entries
            .iter()
            .filter(|(_, parked)| now.duration_since(parked.since) > max_age)
            .map(|(&fd, _)| fd)
            .collect::<Vec<_>>();

        expired
            .into_iter()
            .map(|fd| (fd, entries.remove(&fd).expect("entry vanished under lock").task))
            .collect()
    }

    /// Remove everything; teardown path.
    pub(crate) fn drain(&self) -> Vec<(RawFd, Task)> {
        self.entries
            .lock()
            .drain()
            .map(|(fd, parked)| (fd, parked.task))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
