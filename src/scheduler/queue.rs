//! Per-key FIFO queues.

use std::collections::{HashMap, VecDeque};

use super::task::TaskId;

/// One FIFO of task ids per key.
///
/// Queues are created on first enqueue and dropped once drained.
#[derive(Debug, Default)]
pub struct KeyQueues {
    queues: HashMap<String, VecDeque<TaskId>>,
}

impl KeyQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the key's queue, returning the new length.
    pub fn enqueue(&mut self, key: &str, id: TaskId) -> usize {
        let queue = self.queues.entry(key.to_string()).or_default();
        queue.push_back(id);
        queue.len()
    }

    pub fn dequeue_front(&mut self, key: &str) -> Option<TaskId> {
        let queue = self.queues.get_mut(key)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(key);
        }
        id
    }

    /// Remove one queued task, keeping the order of the rest.
    pub fn remove_by_id(&mut self, key: &str, id: TaskId) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|queued| *queued == id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.queues.remove(key);
        }
        true
    }

    /// Remove every queued task for a key, in queue order.
    pub fn drain_key(&mut self, key: &str) -> Vec<TaskId> {
        self.queues
            .remove(key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.size(key) == 0
    }

    pub fn size(&self, key: &str) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    /// Keys with at least one queued task.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.as_str())
    }

    /// Queued ids for a key, front first.
    pub fn iter_key(&self, key: &str) -> impl Iterator<Item = TaskId> + '_ {
        self.queues.get(key).into_iter().flatten().copied()
    }
}
