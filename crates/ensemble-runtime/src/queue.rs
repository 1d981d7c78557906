//! Per-kind work queue.
//!
//! Multi-producer, multi-consumer, with the dedup discipline reconcile
//! loops need: an item queued twice before delivery collapses to one, and
//! an item re-added while a worker holds it is redelivered only after that
//! worker calls [`WorkQueue::done`]. Per key, at most one reconcile is in
//! flight at any moment.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Exponential retry delay for the given attempt (1-based), capped.
pub fn backoff(attempt: u32) -> Duration {
    let delay_ms = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Items waiting or re-added while processing.
    dirty: HashSet<K>,
    /// Items currently held by workers.
    processing: HashSet<K>,
    /// Retry counts of failing items.
    retries: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            retries: HashMap::new(),
            shutting_down: false,
        }
    }
}

/// Queue snapshot for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub in_flight: usize,
    pub dropped: u64,
}

pub struct WorkQueue<K: Eq + Hash + Clone> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    max_retries: u32,
    dropped: AtomicU64,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> WorkQueue<K> {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_retries,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an item. Duplicates collapse; items held by a worker are
    /// redelivered after `done`. No-op once shutdown has begun.
    pub fn add(&self, item: K) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wait for the next item. Returns `None` once the queue shuts down.
    pub async fn next(&self) -> Option<K> {
        let mut notified = Box::pin(self.notify.notified());
        loop {
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Mark an item finished. If it was re-added while in flight, it goes
    /// back on the queue.
    pub fn done(&self, item: &K) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Record a failure. Returns the delay before the next attempt, or
    /// `None` when the retry budget is exhausted and the item is dropped.
    pub fn next_delay(&self, item: &K) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.retries.entry(item.clone()).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        if attempt > self.max_retries {
            state.retries.remove(item);
            drop(state);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(?item, attempts = attempt, "retries exhausted, dropping item");
            return None;
        }
        Some(backoff(attempt))
    }

    /// Clear the retry count after a success.
    pub fn forget(&self, item: &K) {
        self.state.lock().unwrap().retries.remove(item);
    }

    /// Stop accepting and delivering items; pending waiters wake with
    /// `None`. Already-delivered items stay with their workers.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            depth: state.queue.len(),
            in_flight: state.processing.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicates_collapse_while_queued() {
        let queue = WorkQueue::new(3);
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.stats().depth, 2);
        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.next().await, Some("b"));
    }

    #[tokio::test]
    async fn in_flight_item_is_redelivered_after_done() {
        let queue = WorkQueue::new(3);
        queue.add("a");
        let item = queue.next().await.unwrap();

        // Re-added while processing: not delivered again yet.
        queue.add("a");
        assert_eq!(queue.stats().depth, 0);

        queue.done(&item);
        assert_eq!(queue.stats().depth, 1);
        assert_eq!(queue.next().await, Some("a"));
    }

    #[tokio::test]
    async fn next_blocks_until_add() {
        let queue = Arc::new(WorkQueue::new(3));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add("late");
        assert_eq!(waiter.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters_and_rejects_adds() {
        let queue = Arc::new(WorkQueue::<&str>::new(3));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("rejected");
        assert_eq!(queue.stats().depth, 0);
    }

    #[tokio::test]
    async fn retry_budget_drops_and_counts() {
        let queue = WorkQueue::new(2);
        queue.add("a");
        assert_eq!(queue.next_delay(&"a"), Some(Duration::from_secs(1)));
        assert_eq!(queue.next_delay(&"a"), Some(Duration::from_secs(2)));
        assert_eq!(queue.next_delay(&"a"), None);
        assert_eq!(queue.stats().dropped, 1);

        // After a drop the count restarts.
        assert_eq!(queue.next_delay(&"a"), Some(Duration::from_secs(1)));
        queue.forget(&"a");
        assert_eq!(queue.next_delay(&"a"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(5), Duration::from_secs(16));
        assert_eq!(backoff(20), Duration::from_secs(60));
    }
}
