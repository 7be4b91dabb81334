//! Bounded, priority-ordered work queue with dead-letter handling (C8).

use crate::error::QueueError;
use forgeline_workflow::orchestrator::WorkItem;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use std::time::Duration;

/// Priority class a run request is enqueued under. Higher-priority items
/// dequeue ahead of lower-priority ones; within a class, FIFO order holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Behaviour when [`WorkQueue::enqueue`] is called against a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the new item.
    DropNewest,
    /// Evict the oldest item in the lowest non-empty priority class to make
    /// room for the new one.
    DropOldest,
    /// Block the caller until capacity frees up or `block_timeout` elapses.
    BlockCaller { block_timeout: Duration },
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1024, overflow: OverflowPolicy::DropOldest }
    }
}

struct Inner {
    high: VecDeque<WorkItem>,
    normal: VecDeque<WorkItem>,
    low: VecDeque<WorkItem>,
    dead_letter: VecDeque<(WorkItem, String)>,
}

impl Inner {
    fn new() -> Self {
        Self { high: VecDeque::new(), normal: VecDeque::new(), low: VecDeque::new(), dead_letter: VecDeque::new() }
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<WorkItem> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop_front_lowest_nonempty(&mut self) -> Option<WorkItem> {
        if let Some(item) = self.low.pop_front() {
            return Some(item);
        }
        if let Some(item) = self.normal.pop_front() {
            return Some(item);
        }
        self.high.pop_front()
    }

    fn pop_highest(&mut self) -> Option<WorkItem> {
        if let Some(item) = self.high.pop_front() {
            return Some(item);
        }
        if let Some(item) = self.normal.pop_front() {
            return Some(item);
        }
        self.low.pop_front()
    }
}

/// A bounded work queue shared by the scheduler (producer) and workers
/// (consumers).
pub struct WorkQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty queue under `config`.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self { config, inner: Mutex::new(Inner::new()), notify: Notify::new() }
    }

    /// Enqueues `item` under `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EnqueueTimedOut`] if the queue is full under
    /// `OverflowPolicy::BlockCaller` and the wait times out, or
    /// [`QueueError::Dropped`] under `DropNewest` when full.
    pub async fn enqueue(&self, item: WorkItem, priority: Priority) -> Result<(), QueueError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.len() < self.config.capacity {
                    inner.lane_mut(priority).push_back(item);
                    self.notify.notify_one();
                    return Ok(());
                }

                match self.config.overflow {
                    OverflowPolicy::DropNewest => {
                        return Err(QueueError::Dropped {
                            detail: "queue full, dropping newest item".to_string(),
                        });
                    }
                    OverflowPolicy::DropOldest => {
                        inner.pop_front_lowest_nonempty();
                        inner.lane_mut(priority).push_back(item);
                        self.notify.notify_one();
                        return Ok(());
                    }
                    OverflowPolicy::BlockCaller { .. } => {}
                }
            }

            let OverflowPolicy::BlockCaller { block_timeout } = self.config.overflow else {
                unreachable!("non-blocking policies returned above");
            };
            if tokio::time::timeout(block_timeout, self.notify.notified()).await.is_err() {
                return Err(QueueError::EnqueueTimedOut);
            }
        }
    }

    /// Dequeues the next item, highest priority first, or `None` if empty.
    pub async fn dequeue(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock().await;
        let item = inner.pop_highest();
        drop(inner);
        if item.is_some() {
            self.notify.notify_one();
        }
        item
    }

    /// Moves an unprocessable work item into the dead-letter region.
    pub async fn dead_letter(&self, item: WorkItem, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.dead_letter.push_back((item, reason.into()));
    }

    /// Returns the number of dead-lettered items retained for inspection.
    pub async fn dead_letter_len(&self) -> usize {
        self.inner.lock().await.dead_letter.len()
    }

    /// Returns the number of items currently queued (excluding dead-letter).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_core::WorkflowRunId;
    use forgeline_workflow::node::NodeId;
    use std::collections::HashMap;

    fn item() -> WorkItem {
        WorkItem { run_id: WorkflowRunId::new(), node_id: NodeId::new(), inputs: HashMap::new() }
    }

    #[tokio::test]
    async fn dequeue_returns_fifo_within_priority() {
        let queue = WorkQueue::new(QueueConfig::default());
        let first = item();
        let second = item();
        queue.enqueue(first.clone(), Priority::Normal).await.unwrap();
        queue.enqueue(second.clone(), Priority::Normal).await.unwrap();
        assert_eq!(queue.dequeue().await, Some(first));
        assert_eq!(queue.dequeue().await, Some(second));
    }

    #[tokio::test]
    async fn high_priority_dequeues_before_normal() {
        let queue = WorkQueue::new(QueueConfig::default());
        let normal_item = item();
        let high_item = item();
        queue.enqueue(normal_item, Priority::Normal).await.unwrap();
        queue.enqueue(high_item.clone(), Priority::High).await.unwrap();
        assert_eq!(queue.dequeue().await, Some(high_item));
    }

    #[tokio::test]
    async fn drop_newest_rejects_when_full() {
        let queue = WorkQueue::new(QueueConfig { capacity: 1, overflow: OverflowPolicy::DropNewest });
        queue.enqueue(item(), Priority::Normal).await.unwrap();
        let result = queue.enqueue(item(), Priority::Normal).await;
        assert!(matches!(result, Err(QueueError::Dropped { .. })));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn drop_oldest_evicts_to_make_room() {
        let queue = WorkQueue::new(QueueConfig { capacity: 1, overflow: OverflowPolicy::DropOldest });
        let evicted = item();
        let kept = item();
        queue.enqueue(evicted.clone(), Priority::Normal).await.unwrap();
        queue.enqueue(kept.clone(), Priority::Normal).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.dequeue().await, Some(kept));
    }

    #[tokio::test]
    async fn block_caller_times_out_when_never_drained() {
        let queue = WorkQueue::new(QueueConfig {
            capacity: 1,
            overflow: OverflowPolicy::BlockCaller { block_timeout: Duration::from_millis(20) },
        });
        queue.enqueue(item(), Priority::Normal).await.unwrap();
        let result = queue.enqueue(item(), Priority::Normal).await;
        assert!(matches!(result, Err(QueueError::EnqueueTimedOut)));
    }

    #[tokio::test]
    async fn dead_lettered_items_are_retained_for_inspection() {
        let queue = WorkQueue::new(QueueConfig::default());
        queue.dead_letter(item(), "unknown workflow").await;
        assert_eq!(queue.dead_letter_len().await, 1);
    }
}
