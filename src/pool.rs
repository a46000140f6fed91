//! Worker pool driving the dequeue → scan → re-enqueue loop.
//!
//! Each worker is a tokio task pulling from the shared [`TaskQueue`]. The pool
//! owns the set of resident keys so at most one Task per (contract, event) is
//! queued, delayed or in flight at a time.

use crate::collector::CollectorRegistry;
use crate::config::PoolConfig;
use crate::queue::{QueueItem, TaskQueue};
use crate::task::{Task, TaskKey};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const QUEUE_REPORT_EVERY: u64 = 100;

/// Counters shared by every worker.
#[derive(Debug, Default)]
pub struct PoolStats {
    scans: AtomicU64,
    persisted: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    unknown: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub scans: u64,
    pub persisted: u64,
    pub retried: u64,
    pub dropped: u64,
    pub unknown: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `initial * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exponent).min(max)
}

struct Shared {
    queue: Arc<TaskQueue>,
    registry: CollectorRegistry,
    config: PoolConfig,
    resident: Mutex<HashSet<TaskKey>>,
    stats: PoolStats,
}

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(queue: Arc<TaskQueue>, registry: CollectorRegistry, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                registry,
                config,
                resident: Mutex::new(HashSet::new()),
                stats: PoolStats::default(),
            }),
        }
    }

    /// Enqueue `task` unless a Task for the same key is already resident.
    pub fn submit(&self, task: Task) -> bool {
        let key = task.key();
        if !self.shared.resident().insert(key.clone()) {
            warn!(key = %key, "Task already resident, ignoring duplicate");
            return false;
        }

        debug!(
            key = %key,
            collector = %task.collector,
            from_block = task.from_block,
            "Submitted task"
        );
        self.shared.queue.put_task(task);
        true
    }

    pub fn is_resident(&self, key: &TaskKey) -> bool {
        self.shared.resident().contains(key)
    }

    pub fn resident_count(&self) -> usize {
        self.shared.resident().len()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    /// Start `max_collectors` workers.
    pub fn spawn(&self) -> PoolHandle {
        let worker_count = self.shared.config.max_collectors.max(1);
        info!(
            workers = worker_count,
            collectors = self.shared.registry.len(),
            "Starting worker pool"
        );

        let workers = (0..worker_count)
            .map(|worker_id| {
                let shared = self.shared.clone();
                tokio::spawn(async move { shared.run_worker(worker_id).await })
            })
            .collect();

        PoolHandle {
            queue: self.shared.queue.clone(),
            workers,
        }
    }
}

impl Shared {
    fn resident(&self) -> MutexGuard<'_, HashSet<TaskKey>> {
        self.resident
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &TaskKey) {
        self.resident().remove(key);
    }

    fn drop_task(&self, task: &Task) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        self.release(&task.key());
    }

    async fn run_worker(&self, worker_id: usize) {
        debug!(worker = worker_id, "Worker started");
        loop {
            match self.queue.get().await {
                QueueItem::Stop => {
                    // Pass it on so the remaining workers see it too.
                    self.queue.put(QueueItem::Stop);
                    debug!(worker = worker_id, "Worker stopping");
                    break;
                }
                QueueItem::Work(task) => self.handle(worker_id, task).await,
            }
        }
    }

    async fn handle(&self, worker_id: usize, task: Task) {
        let Some(collector) = self.registry.get(&task.collector) else {
            error!(
                worker = worker_id,
                collector = %task.collector,
                key = %task.key(),
                "Unknown collector, dropping task"
            );
            self.stats.unknown.fetch_add(1, Ordering::Relaxed);
            self.drop_task(&task);
            return;
        };

        if task.attempts > self.config.max_attempts {
            error!(
                worker = worker_id,
                key = %task.key(),
                attempts = task.attempts,
                "Task exceeded retry ceiling, dropping"
            );
            self.drop_task(&task);
            return;
        }

        let result = AssertUnwindSafe(collector.scan(&task)).catch_unwind().await;
        let scans = self.stats.scans.fetch_add(1, Ordering::Relaxed) + 1;

        match result {
            Ok(Ok(outcome)) => {
                self.stats
                    .persisted
                    .fetch_add(outcome.persisted as u64, Ordering::Relaxed);
                if outcome.caught_up {
                    self.queue.put_after(outcome.next, self.config.poll_interval);
                } else {
                    self.queue.put_task(outcome.next);
                }
            }
            Ok(Err(e)) if e.is_transient() => self.retry(worker_id, task, &e.to_string()),
            Ok(Err(e)) => {
                error!(
                    worker = worker_id,
                    key = %task.key(),
                    error = %e,
                    "Permanent scan failure, dropping task"
                );
                self.drop_task(&task);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    worker = worker_id,
                    key = %task.key(),
                    panic = %message,
                    "Collector panicked"
                );
                self.retry(worker_id, task, &message);
            }
        }

        if scans % QUEUE_REPORT_EVERY == 0 {
            info!(
                worker = worker_id,
                queued = self.queue.len(),
                resident = self.resident().len(),
                scans,
                "Queue status"
            );
        }
    }

    fn retry(&self, worker_id: usize, task: Task, reason: &str) {
        let next = task.retry();
        if next.attempts > self.config.max_attempts {
            error!(
                worker = worker_id,
                key = %next.key(),
                from_block = next.from_block,
                attempts = next.attempts,
                error = reason,
                "Giving up on task after repeated failures"
            );
            self.drop_task(&next);
            return;
        }

        let delay = backoff_delay(
            self.config.initial_backoff,
            self.config.max_backoff,
            next.attempts,
        );
        warn!(
            worker = worker_id,
            key = %next.key(),
            from_block = next.from_block,
            attempt = next.attempts,
            error = reason,
            "Scan failed, retrying in {:?}",
            delay
        );
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        self.queue.put_after(next, delay);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct PoolHandle {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Ask every worker to exit once its current scan finishes.
    pub fn stop(&self) {
        self.queue.put(QueueItem::Stop);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn join(self) {
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = worker_id, "Worker task failed: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn task(event: &str) -> Task {
        Task::named("GenericEventCollector", Address::ZERO, event, 10)
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(3);
        assert_eq!(backoff_delay(initial, max, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(initial, max, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(initial, max, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(initial, max, 4), max);
        assert_eq!(backoff_delay(initial, max, 200), max);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let pool = WorkerPool::new(
            Arc::new(TaskQueue::new()),
            CollectorRegistry::new(),
            PoolConfig::default(),
        );

        assert!(pool.submit(task("Transfer")));
        assert!(!pool.submit(task("Transfer").advance(50)));
        assert!(pool.submit(task("Approval")));
        assert_eq!(pool.queue().len(), 2);
        assert_eq!(pool.resident_count(), 2);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
