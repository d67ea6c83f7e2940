//! Lifecycle of the process-wide scheduler: explicit start/stop, the lazy
//! accessor, and full re-initialization after a stop.
//!
//! Everything lives in one test because the instance is process-global.

mod common;

use common::wait_until;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn global_scheduler_lifecycle() {
    // Explicit start; double start is refused.
    filament::start(2).unwrap();
    assert!(filament::start(2).is_err());

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    filament::submit(async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_until(Duration::from_secs(10), || {
        ran.load(Ordering::SeqCst) == 1
    }));

    let stats = filament::stats().expect("running scheduler has stats");
    assert!(stats.total_scheduled >= 1);
    assert_eq!(stats.per_worker_executed.len(), 2);

    // Stop tears the instance down entirely.
    filament::stop();
    assert!(filament::stats().is_none());
    filament::stop(); // idempotent

    // The accessor lazily constructs a fresh instance...
    let scheduler = filament::handle();
    assert!(scheduler.is_running());

    let counter = Arc::clone(&ran);
    filament::submit_with_affinity(
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        0,
    );
    assert!(wait_until(Duration::from_secs(10), || {
        ran.load(Ordering::SeqCst) == 2
    }));

    // ...whose counters start from zero: this is a new scheduler, not the
    // stopped one resurrected.
    let stats = filament::stats().unwrap();
    assert!(stats.total_scheduled < 10);

    filament::stop();
    assert!(filament::stats().is_none());
}
