use alloy_primitives::Address;
use nft_indexer::collector::{Collector, CollectorRegistry, ScanFuture, ScanOutcome};
use nft_indexer::config::PoolConfig;
use nft_indexer::error::{RpcError, ScanError};
use nft_indexer::pool::WorkerPool;
use nft_indexer::queue::TaskQueue;
use nft_indexer::task::{Task, TaskKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn config(workers: usize, max_attempts: u32) -> PoolConfig {
    PoolConfig {
        max_collectors: workers,
        poll_interval: Duration::from_millis(5),
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

fn task(collector: &str, event: &str, from_block: u64) -> Task {
    Task::named(collector, Address::ZERO, event, from_block)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Advances ten blocks per scan; once a scan reaches `head` it repeats.
#[derive(Default)]
struct SteppingCollector {
    head: u64,
    seen: Mutex<HashMap<TaskKey, Vec<(u64, bool)>>>,
    in_flight: Mutex<HashMap<TaskKey, usize>>,
    overlap: AtomicBool,
}

impl SteppingCollector {
    fn enter(&self, key: &TaskKey) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(key.clone()).or_default();
        *count += 1;
        if *count > 1 {
            self.overlap.store(true, Ordering::SeqCst);
        }
    }

    fn leave(&self, key: &TaskKey) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(key) {
            *count -= 1;
        }
    }

    fn scans(&self, event: &str) -> Vec<(u64, bool)> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| key.event == event)
            .map(|(_, scans)| scans.clone())
            .unwrap_or_default()
    }
}

impl Collector for SteppingCollector {
    fn scan<'a>(&'a self, task: &'a Task) -> ScanFuture<'a> {
        Box::pin(async move {
            let key = task.key();
            self.enter(&key);
            sleep(Duration::from_millis(1)).await;

            let to_block = (task.from_block + 9).min(self.head);
            let caught_up = to_block >= self.head;
            let next = if caught_up {
                task.advance(task.from_block)
            } else {
                task.advance(to_block + 1)
            };

            self.seen
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_default()
                .push((task.from_block, caught_up));
            self.leave(&key);

            Ok::<_, ScanError>(ScanOutcome {
                persisted: 1,
                next,
                caught_up,
            })
        })
    }
}

/// Fails every scan in a fixed way and counts calls.
struct FailingCollector {
    calls: AtomicUsize,
    failure: fn() -> ScanError,
}

impl FailingCollector {
    fn new(failure: fn() -> ScanError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure,
        }
    }
}

impl Collector for FailingCollector {
    fn scan<'a>(&'a self, _task: &'a Task) -> ScanFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err::<ScanOutcome, _>((self.failure)())
        })
    }
}

fn explode() -> Result<ScanOutcome, ScanError> {
    panic!("collector exploded")
}

struct PanickingCollector {
    calls: AtomicUsize,
}

impl Collector for PanickingCollector {
    fn scan<'a>(&'a self, _task: &'a Task) -> ScanFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            explode()
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keys_advance_monotonically_one_scan_at_a_time() {
    let collector = Arc::new(SteppingCollector {
        head: 100,
        ..Default::default()
    });
    let registry = CollectorRegistry::new().with_collector("stepping", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(8, 3));

    assert!(pool.submit(task("stepping", "Transfer", 0)));
    assert!(pool.submit(task("stepping", "Approval", 50)));
    assert!(!pool.submit(task("stepping", "Transfer", 30)));

    let handle = pool.spawn();
    wait_until(|| collector.scans("Transfer").len() >= 13 && collector.scans("Approval").len() >= 8)
        .await;
    handle.stop();
    handle.join().await;

    assert!(!collector.overlap.load(Ordering::SeqCst));

    for event in ["Transfer", "Approval"] {
        let scans = collector.scans(event);
        for pair in scans.windows(2) {
            let ((prev, prev_caught_up), (next, _)) = (pair[0], pair[1]);
            assert!(next >= prev, "{event}: {next} after {prev}");
            if !prev_caught_up {
                assert!(next > prev, "{event}: stalled at {prev}");
            }
        }
    }

    // Caught-up keys keep re-polling the window that reached the head.
    let transfer = collector.scans("Transfer");
    let first_pass: Vec<u64> = transfer[..11].iter().map(|s| s.0).collect();
    assert_eq!(first_pass, (0..=100u64).step_by(10).collect::<Vec<_>>());
    assert!(transfer[10..].iter().all(|&(from, caught_up)| from == 100 && caught_up));

    assert_eq!(pool.resident_count(), 2);
    assert!(pool.stats().scans >= 21);
}

#[tokio::test]
async fn stop_terminates_every_worker() {
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), CollectorRegistry::new(), config(16, 3));
    let handle = pool.spawn();
    assert_eq!(handle.worker_count(), 16);

    handle.stop();
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("workers did not stop");
}

#[tokio::test]
async fn stop_jumps_ahead_of_pending_work() {
    let collector = Arc::new(SteppingCollector {
        head: 1_000_000,
        ..Default::default()
    });
    let registry = CollectorRegistry::new().with_collector("stepping", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(1, 3));
    for i in 0..50 {
        pool.submit(task("stepping", &format!("Event{i}"), 0));
    }

    let handle = pool.spawn();
    handle.stop();
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("workers did not stop");

    // At most the scan already taken before Stop arrived.
    assert!(pool.stats().scans <= 1);
}

#[tokio::test]
async fn unknown_collector_is_dropped_and_key_released() {
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), CollectorRegistry::new(), config(2, 3));
    assert!(pool.submit(task("Missing", "Transfer", 0)));

    let handle = pool.spawn();
    wait_until(|| pool.stats().unknown == 1).await;
    wait_until(|| pool.resident_count() == 0).await;
    handle.stop();
    handle.join().await;

    assert_eq!(pool.stats().scans, 0);
    assert_eq!(pool.stats().dropped, 1);
}

#[tokio::test]
async fn transient_failures_retry_up_to_ceiling() {
    let collector = Arc::new(FailingCollector::new(|| {
        ScanError::Rpc(RpcError::Timeout(Duration::from_secs(1)))
    }));
    let registry = CollectorRegistry::new().with_collector("failing", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(2, 2));
    pool.submit(task("failing", "Transfer", 7));

    let handle = pool.spawn();
    wait_until(|| pool.stats().dropped == 1).await;
    handle.stop();
    handle.join().await;

    // First attempt plus two retries.
    assert_eq!(collector.calls.load(Ordering::SeqCst), 3);
    let stats = pool.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(pool.resident_count(), 0);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let collector = Arc::new(FailingCollector::new(|| {
        ScanError::InvalidTask("no ABI fragment".to_string())
    }));
    let registry = CollectorRegistry::new().with_collector("failing", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(2, 5));
    pool.submit(task("failing", "Transfer", 7));

    let handle = pool.spawn();
    wait_until(|| pool.stats().dropped == 1).await;
    handle.stop();
    handle.join().await;

    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().retried, 0);
}

#[tokio::test]
async fn panicking_collector_is_contained() {
    let collector = Arc::new(PanickingCollector {
        calls: AtomicUsize::new(0),
    });
    let registry = CollectorRegistry::new().with_collector("panicking", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(1, 1));
    pool.submit(task("panicking", "Transfer", 7));

    let handle = pool.spawn();
    wait_until(|| pool.stats().dropped == 1).await;
    handle.stop();
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("worker died with the collector");

    assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn task_past_ceiling_is_dropped_unscanned() {
    let collector = Arc::new(FailingCollector::new(|| {
        ScanError::Rpc(RpcError::Node("unreachable".to_string()))
    }));
    let registry = CollectorRegistry::new().with_collector("failing", collector.clone());
    let pool = WorkerPool::new(Arc::new(TaskQueue::new()), registry, config(1, 1));
    pool.submit(task("failing", "Transfer", 7).retry().retry());

    let handle = pool.spawn();
    wait_until(|| pool.stats().dropped == 1).await;
    handle.stop();
    handle.join().await;

    assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
}
