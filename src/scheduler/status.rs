//! Status snapshot types.

use std::collections::BTreeMap;

use super::task::TaskId;

/// A task currently held by a running slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningEntry {
    pub id: TaskId,
    pub key: String,
    pub preview: String,
    pub elapsed_secs: u64,
}

/// A task waiting in a key's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEntry {
    pub id: TaskId,
    pub preview: String,
}

/// Point-in-time view of running and queued tasks across all keys.
///
/// Taken under the scheduler's state lock, so a task appears in exactly one
/// of the two collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Sorted by task id.
    pub running: Vec<RunningEntry>,
    /// Per key, front of the queue first. Keys with nothing queued are absent.
    pub queued: BTreeMap<String, Vec<QueuedEntry>>,
}

impl Snapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queued.is_empty()
    }

    /// Running entries for one key (zero or one).
    pub fn running_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a RunningEntry> + 'a {
        self.running.iter().filter(move |r| r.key == key)
    }

    /// Queued entries for one key.
    pub fn queued_for(&self, key: &str) -> &[QueuedEntry] {
        self.queued.get(key).map_or(&[], Vec::as_slice)
    }
}
