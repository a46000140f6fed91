//! Shared work queue between the bootstrap code and the worker pool.
//!
//! Ready items are served in FIFO order. Scheduled items (continuations of
//! caught-up keys, retries) sit in a deadline heap until they are due. `Stop`
//! jumps ahead of everything so shutdown does not wait for the backlog.

use crate::task::Task;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

#[derive(Debug, Clone)]
pub enum QueueItem {
    Work(Task),
    Stop,
}

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest deadline first.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<QueueItem>,
    scheduled: BinaryHeap<Scheduled>,
    seq: u64,
}

impl Inner {
    fn promote_due(&mut self, now: Instant) {
        while self.scheduled.peek().is_some_and(|s| s.due <= now) {
            if let Some(s) = self.scheduled.pop() {
                self.ready.push_back(QueueItem::Work(s.task));
            }
        }
    }
}

#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue without blocking. `Stop` is placed ahead of pending work.
    pub fn put(&self, item: QueueItem) {
        {
            let mut inner = self.lock();
            match item {
                QueueItem::Stop => inner.ready.push_front(QueueItem::Stop),
                work => inner.ready.push_back(work),
            }
        }
        self.notify.notify_one();
    }

    pub fn put_task(&self, task: Task) {
        self.put(QueueItem::Work(task));
    }

    /// Enqueue a task that becomes visible once `delay` has elapsed.
    pub fn put_after(&self, task: Task, delay: Duration) {
        if delay.is_zero() {
            self.put_task(task);
            return;
        }
        {
            let mut inner = self.lock();
            inner.seq += 1;
            let seq = inner.seq;
            inner.scheduled.push(Scheduled {
                due: Instant::now() + delay,
                seq,
                task,
            });
        }
        // Wake a waiter so it can re-arm its timer against the new deadline.
        self.notify.notify_one();
    }

    /// Wait until an item is available and take it.
    pub async fn get(&self) -> QueueItem {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut inner = self.lock();
                inner.promote_due(Instant::now());
                if let Some(item) = inner.ready.pop_front() {
                    return item;
                }
                inner.scheduled.peek().map(|s| s.due)
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Ready plus scheduled items.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.ready.len() + inner.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn task(from_block: u64) -> Task {
        Task::named("test", Address::ZERO, "Transfer", from_block)
    }

    fn from_block(item: QueueItem) -> u64 {
        match item {
            QueueItem::Work(task) => task.from_block,
            QueueItem::Stop => panic!("unexpected stop"),
        }
    }

    #[tokio::test]
    async fn serves_ready_items_in_order() {
        let queue = TaskQueue::new();
        queue.put_task(task(1));
        queue.put_task(task(2));
        assert_eq!(from_block(queue.get().await), 1);
        assert_eq!(from_block(queue.get().await), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn stop_jumps_the_backlog() {
        let queue = TaskQueue::new();
        queue.put_task(task(1));
        queue.put(QueueItem::Stop);
        assert!(matches!(queue.get().await, QueueItem::Stop));
    }

    #[tokio::test]
    async fn scheduled_items_wait_for_their_deadline() {
        let queue = TaskQueue::new();
        queue.put_after(task(7), Duration::from_millis(50));
        queue.put_task(task(1));

        assert_eq!(from_block(queue.get().await), 1);

        let started = std::time::Instant::now();
        assert_eq!(from_block(queue.get().await), 7);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn blocked_getter_wakes_on_put() {
        let queue = Arc::new(TaskQueue::new());
        let getter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put_task(task(9));

        let item = timeout(Duration::from_secs(1), getter).await.unwrap().unwrap();
        assert_eq!(from_block(item), 9);
    }
}
