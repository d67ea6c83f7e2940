//! Work stealing: flood one worker through affinity submission and watch
//! the idle workers drain it.

mod common;

use common::{spin_for, wait_until};
use filament::Builder;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn idle_workers_steal_from_a_flooded_one() {
    const TASKS: usize = 300;

    let scheduler = Builder::new()
        .worker_threads(4)
        .pin_workers(false)
        .try_start()
        .unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..TASKS {
        let completed = Arc::clone(&completed);
        scheduler.submit_with_affinity(
            async move {
                spin_for(Duration::from_micros(500));
                completed.fetch_add(1, Ordering::SeqCst);
            },
            0,
        );
    }

    assert!(wait_until(Duration::from_secs(30), || {
        completed.load(Ordering::SeqCst) == TASKS
    }));

    let stats = scheduler.stats();
    assert!(stats.steals > 0, "no steals in {stats:?}");
    assert!(
        stats.per_worker_executed.iter().all(|&count| count > 0),
        "idle worker in {stats:?}"
    );

    scheduler.shutdown();
}

#[test]
fn affinity_clamps_to_the_pool() {
    let scheduler = Builder::new()
        .worker_threads(2)
        .pin_workers(false)
        .try_start()
        .unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let completed = Arc::clone(&completed);
        scheduler.submit_with_affinity(
            async move {
                spin_for(Duration::from_micros(200));
                completed.fetch_add(1, Ordering::SeqCst);
            },
            // Far beyond the pool: must land on the last worker, not panic.
            1_000,
        );
    }

    assert!(wait_until(Duration::from_secs(10), || {
        completed.load(Ordering::SeqCst) == 50
    }));

    let stats = scheduler.stats();
    assert!(stats.per_worker_executed[1] > 0, "stats: {stats:?}");

    scheduler.shutdown();
}
