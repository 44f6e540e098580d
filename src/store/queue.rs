//! Bounded write queue: a `VecDeque` behind a mutex rather than
//! `tokio::sync::mpsc`, because the writer's transient-error path needs to
//! push a batch back onto the *front* of the queue (LIFO re-enqueue),
//! something an mpsc channel can't express.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::model::BlockFragment;

pub struct WriteQueue {
    inner: Mutex<VecDeque<BlockFragment>>,
    depth: AtomicUsize,
    not_empty: Notify,
    drained: Notify,
    high_water: usize,
}

impl WriteQueue {
    pub fn new(high_water: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::new()),
            depth: AtomicUsize::new(0),
            not_empty: Notify::new(),
            drained: Notify::new(),
            high_water,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_over_high_water(&self) -> bool {
        self.depth() >= self.high_water
    }

    /// Pushes one fragment to the back of the queue (normal producer
    /// path — the assembler pipeline).
    pub async fn push(&self, fragment: BlockFragment) {
        let mut guard = self.inner.lock().await;
        guard.push_back(fragment);
        self.depth.fetch_add(1, Ordering::AcqRel);
        drop(guard);
        self.not_empty.notify_one();
    }

    /// Re-enqueues a popped batch at the front, preserving its original
    /// relative order, after a transient write failure.
    pub async fn requeue_front(&self, fragments: Vec<BlockFragment>) {
        if fragments.is_empty() {
            return;
        }
        let count = fragments.len();
        let mut guard = self.inner.lock().await;
        for fragment in fragments.into_iter().rev() {
            guard.push_front(fragment);
        }
        drop(guard);
        self.depth.fetch_add(count, Ordering::AcqRel);
        self.not_empty.notify_one();
    }

    /// Waits for at least one fragment, then pops up to `max` of them.
    pub async fn pop_batch(&self, max: usize) -> Vec<BlockFragment> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if !guard.is_empty() {
                    let take = max.min(guard.len());
                    let batch: Vec<_> = guard.drain(..take).collect();
                    drop(guard);
                    self.depth.fetch_sub(batch.len(), Ordering::AcqRel);
                    if self.depth() == 0 {
                        self.drained.notify_waiters();
                    }
                    return batch;
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Used by `Status`/tests and graceful shutdown to wait for the queue
    /// to empty out after the producer side stops. Registers as a waiter
    /// before re-checking depth so a drain that races with the check is
    /// never missed.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.depth() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> BlockFragment {
        BlockFragment::default()
    }

    #[tokio::test]
    async fn push_then_pop_roundtrips() {
        let queue = WriteQueue::new(10);
        queue.push(fragment()).await;
        assert_eq!(queue.depth(), 1);
        let batch = queue.pop_batch(5).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn requeue_front_restores_depth() {
        let queue = WriteQueue::new(10);
        queue.push(fragment()).await;
        queue.push(fragment()).await;
        let batch = queue.pop_batch(10).await;
        assert_eq!(queue.depth(), 0);
        queue.requeue_front(batch).await;
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn over_high_water_is_reported() {
        let queue = WriteQueue::new(2);
        queue.push(fragment()).await;
        assert!(!queue.is_over_high_water());
        queue.push(fragment()).await;
        assert!(queue.is_over_high_water());
    }

    #[tokio::test]
    async fn pop_batch_waits_for_a_push() {
        let queue = WriteQueue::new(10);
        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.pop_batch(5).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(fragment()).await;
        let batch = handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
