//! Priority-ordered pending queue.

use std::collections::BTreeMap;

use synapse_events::Priority;

use crate::task::TaskId;

/// Position in the queue: priority rank, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    rank: u8,
    seq: u64,
}

impl QueueKey {
    pub const fn rank(&self) -> u8 {
        self.rank
    }

    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

/// Pending tasks ordered critical > high > normal > low, FIFO within a band.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    entries: BTreeMap<QueueKey, TaskId>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, task_id: TaskId) -> QueueKey {
        let key = QueueKey {
            rank: priority.rank(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, task_id);
        key
    }

    pub fn remove(&mut self, key: QueueKey) -> Option<TaskId> {
        self.entries.remove(&key)
    }

    /// Entries in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueKey, &TaskId)> {
        self.entries.iter().map(|(key, id)| (*key, id))
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
