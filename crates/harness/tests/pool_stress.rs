//! Concurrent stress of the execution context pool

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use testgrid_common::WorkerId;

use common::{config_in, pool, StubLauncher};

const WORKERS: usize = 8;
const ROUNDS: usize = 50;

#[test]
fn at_most_one_live_context_per_worker() {
    let dir = TempDir::new().unwrap();
    let launcher = StubLauncher::new();
    let pool = pool(config_in(&dir), launcher.clone());

    thread::scope(|scope| {
        for index in 0..WORKERS {
            let pool = &pool;
            scope.spawn(move || {
                let worker = WorkerId(index);
                for round in 0..ROUNDS {
                    let first = pool.get_or_create(worker).unwrap().unwrap();
                    let second = pool.get_or_create(worker).unwrap().unwrap();
                    assert!(Arc::ptr_eq(&first, &second));
                    assert_eq!(first.lock().owner(), worker);

                    assert!(pool.dispose(worker));
                    if round % 2 == 0 {
                        assert!(!pool.dispose(worker));
                    }
                    assert!(!first.lock().is_alive());
                }
            });
        }
    });

    assert_eq!(pool.live_count(), 0);
    assert_eq!(launcher.counters.live(), 0);
    assert_eq!(launcher.counters.created(), WORKERS * ROUNDS);
    assert!(launcher.counters.max_live.load(Ordering::SeqCst) <= WORKERS);
}

#[test]
fn leases_release_on_every_path() {
    let dir = TempDir::new().unwrap();
    let launcher = StubLauncher::new();
    let pool = pool(config_in(&dir), launcher.clone());

    thread::scope(|scope| {
        for index in 0..WORKERS {
            let pool = &pool;
            scope.spawn(move || {
                for _ in 0..10 {
                    let lease = pool.lease(WorkerId(index));
                    lease.context().unwrap();
                }
            });
        }
    });

    assert_eq!(launcher.counters.live(), 0);
    assert_eq!(pool.dispose_all(), 0);
}
