//! End-to-end echo over real sockets: one task per connection, reads and
//! writes suspending on fd readiness.

#![cfg(unix)]

mod common;

use common::wait_until;
use filament::net::TcpListener;
use filament::{Builder, Scheduler};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const GREETING: &[u8] = b"hello, world!";

#[test]
fn echo_over_one_connection() {
    let scheduler = Builder::new()
        .worker_threads(2)
        .pin_workers(false)
        .try_start()
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&served);
    scheduler.submit(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; GREETING.len()];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, GREETING.len());
        stream.write(&buf).await.unwrap();
        flag.store(true, Ordering::SeqCst);
    });

    // Delay the client on purpose so both the accept and the read actually
    // park instead of completing on the first syscall.
    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(250));
        let mut conn = std::net::TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(250));
        conn.write_all(GREETING).unwrap();

        let mut echoed = [0u8; GREETING.len()];
        conn.read_exact(&mut echoed).unwrap();
        echoed
    });

    assert_eq!(&client.join().unwrap(), GREETING);
    assert!(wait_until(Duration::from_secs(10), || {
        served.load(Ordering::SeqCst)
    }));

    // Accept and read both parked, and nothing stayed behind in the table.
    assert!(wait_until(Duration::from_secs(5), || {
        scheduler.pending_io() == 0
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        let stats = scheduler.stats();
        stats.total_io_parked >= 2 && stats.total_resumed >= 2
    }), "stats: {:?}", scheduler.stats());

    scheduler.shutdown();
}

#[test]
fn concurrent_echo_sessions() {
    const CONNECTIONS: usize = 32;
    const ROUNDS: usize = 4;
    const CHUNK: usize = 256;

    let scheduler = Arc::new(
        Builder::new()
            .worker_threads(3)
            .pin_workers(false)
            .try_start()
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let completed = Arc::new(AtomicUsize::new(0));

    let submitter: Arc<Scheduler> = Arc::clone(&scheduler);
    let done = Arc::clone(&completed);
    scheduler.submit(async move {
        for _ in 0..CONNECTIONS {
            let (stream, _) = listener.accept().await.unwrap();
            let done = Arc::clone(&done);
            submitter.submit(async move {
                let mut buf = [0u8; CHUNK];
                for _ in 0..ROUNDS {
                    let n = stream.read(&mut buf).await.unwrap();
                    assert_eq!(n, CHUNK);
                    stream.write(&buf).await.unwrap();
                }
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    let clients = (0..CONNECTIONS)
        .map(|i| {
            thread::spawn(move || {
                let mut conn = std::net::TcpStream::connect(addr).unwrap();
                let payload = [i as u8; CHUNK];
                let mut echoed = [0u8; CHUNK];
                for _ in 0..ROUNDS {
                    conn.write_all(&payload).unwrap();
                    conn.read_exact(&mut echoed).unwrap();
                    assert_eq!(echoed, payload);
                }
            })
        })
        .collect::<Vec<_>>();

    for client in clients {
        client.join().unwrap();
    }
    assert!(wait_until(Duration::from_secs(30), || {
        completed.load(Ordering::SeqCst) == CONNECTIONS
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        scheduler.pending_io() == 0
    }));

    let stats = scheduler.stats();
    assert!(
        stats.per_worker_executed.iter().all(|&count| count > 0),
        "idle worker in {stats:?}"
    );
    // Every park was matched by a resumption (or an expiry, of which this
    // run has none) once the table drained.
    assert!(
        wait_until(Duration::from_secs(5), || {
            let stats = scheduler.stats();
            stats.total_io_parked == stats.total_resumed + stats.io_expired
        }),
        "stats: {:?}",
        scheduler.stats()
    );

    scheduler.shutdown();
}
