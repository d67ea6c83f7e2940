//! Teardown under load: stop must destroy every parked task, join every
//! runtime thread within the bound, and freeze the counters.

#![cfg(unix)]

mod common;

use common::{DropProbe, wait_until};
use filament::{Builder, Interest, io};
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

const PARKED: usize = 100;

#[test]
fn stop_destroys_parked_tasks_within_the_bound() {
    let scheduler = Builder::new()
        .worker_threads(2)
        .pin_workers(false)
        .try_start()
        .unwrap();

    let drops = DropProbe::counter();
    // Keep the write ends open so the reads never become ready: the tasks
    // park and stay parked.
    let mut write_ends = Vec::with_capacity(PARKED);
    for _ in 0..PARKED {
        let (r, w) = nix::unistd::pipe().unwrap();
        write_ends.push(w);

        let probe = DropProbe::new(&drops);
        scheduler.submit(async move {
            let _probe = probe;
            let fd = r;
            io::readiness(fd.as_raw_fd(), Interest::READABLE).await;
        });
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            scheduler.pending_io() == PARKED
        }),
        "only {} of {PARKED} tasks parked",
        scheduler.pending_io()
    );

    let begin = Instant::now();
    scheduler.shutdown();
    assert!(
        begin.elapsed() < Duration::from_secs(5),
        "shutdown took {:?}",
        begin.elapsed()
    );

    assert_eq!(drops.load(Ordering::SeqCst), PARKED, "parked tasks leaked");
    assert_eq!(scheduler.pending_io(), 0);
    assert!(!scheduler.is_running());

    // No further stat updates after stop.
    let frozen = scheduler.stats();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(scheduler.stats(), frozen);
}

#[test]
fn shutdown_is_idempotent() {
    let scheduler = Builder::new()
        .worker_threads(1)
        .pin_workers(false)
        .try_start()
        .unwrap();

    scheduler.shutdown();
    scheduler.shutdown();
    assert!(!scheduler.is_running());
}
