//! Priority task queue.
//!
//! A single mutex guards a binary heap ordered by priority weight (highest
//! first), then creation time (earliest first). Callers never hold the lock
//! while a task runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::task::Task;

/// Heap entry giving [`Task`] its dequeue order.
struct Queued(Task);

impl Queued {
    fn key(&self) -> (u8, std::time::Instant, u64) {
        (
            self.0.priority().weight(),
            self.0.created_at(),
            self.0.sequence(),
        )
    }
}

impl PartialEq for Queued {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    /// Greater means "runs sooner" (`BinaryHeap` is a max-heap).
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        let (priority, created_at, sequence) = self.key();
        let (other_priority, other_created_at, other_sequence) = other.key();
        priority
            .cmp(&other_priority)
            .then_with(|| other_created_at.cmp(&created_at))
            .then_with(|| other_sequence.cmp(&sequence))
    }
}

/// Thread-safe priority queue of tasks.
#[derive(Default)]
pub struct PriorityTaskQueue {
    heap: Mutex<BinaryHeap<Queued>>,
    available: Condvar,
}

impl std::fmt::Debug for PriorityTaskQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PriorityTaskQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl PriorityTaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a task and wake one waiting consumer.
    pub fn push(
        &self,
        task: Task,
    ) {
        self.heap.lock().push(Queued(task));
        self.available.notify_one();
    }

    /// Pop the task that should run next.
    pub fn pop(&self) -> Option<Task> {
        self.heap.lock().pop().map(|queued| queued.0)
    }

    /// Pop the next task, waiting up to `timeout` if the queue is empty.
    pub fn pop_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Task> {
        let mut heap = self.heap.lock();
        if heap.is_empty() {
            let _ = self.available.wait_for(&mut heap, timeout);
        }
        heap.pop().map(|queued| queued.0)
    }

    /// Drop every queued task, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<Queued> = self.heap.lock().drain().collect();
        // Callbacks (and whatever they capture) are dropped outside the lock.
        drained.len()
    }

    /// Wake every waiting consumer.
    pub fn notify_all(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
