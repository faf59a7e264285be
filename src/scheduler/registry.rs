//! Task registry — id allocation and the id → task index.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use super::task::{Submission, Task, TaskId, TaskStatus};

/// Owns every task record. Not synchronized; lives inside the scheduler's state lock.
#[derive(Debug)]
pub struct TaskRegistry {
    next_id: u64,
    tasks: HashMap<TaskId, Task>,
    /// Terminal tasks in the order they finished, oldest first.
    finished: VecDeque<TaskId>,
    max_retained: usize,
}

impl TaskRegistry {
    pub fn new(max_retained: usize) -> Self {
        Self {
            next_id: 1,
            tasks: HashMap::new(),
            finished: VecDeque::new(),
            max_retained,
        }
    }

    /// Assign the next id and record a `Queued` task.
    pub fn allocate(&mut self, submission: Submission) -> Task {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let task = Task {
            id,
            key: submission.key,
            payload: submission.payload,
            input: submission.input,
            reply_to: submission.reply_to,
            status: TaskStatus::Queued,
            submitted_at: Utc::now(),
        };
        self.tasks.insert(id, task.clone());
        task
    }

    pub fn lookup(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Apply a status transition.
    ///
    /// Returns whether the transition was applied. An illegal transition is a
    /// locking bug: it panics in debug builds and is ignored in release.
    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            tracing::error!(task_id = %id, target_status = %status, "Status update for unknown task");
            debug_assert!(false, "status update for unknown task {id}");
            return false;
        };

        if !task.status.can_transition_to(status) {
            tracing::error!(
                task_id = %id,
                from = %task.status,
                to = %status,
                "Rejected invalid task transition"
            );
            debug_assert!(
                false,
                "invalid task transition {} -> {} for task {id}",
                task.status, status
            );
            return false;
        }

        task.status = status;
        if status.is_terminal() {
            self.finished.push_back(id);
            self.prune();
        }
        true
    }

    /// Number of tasks currently indexed.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn prune(&mut self) {
        while self.finished.len() > self.max_retained {
            if let Some(old) = self.finished.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(registry: &mut TaskRegistry, text: &str) -> TaskId {
        registry.allocate(Submission::new("/w/alpha", text)).id
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut registry = TaskRegistry::new(10);
        let a = submit(&mut registry, "a");
        let b = submit(&mut registry, "b");
        let c = submit(&mut registry, "c");
        assert!(a < b && b < c);
        assert_eq!(registry.lookup(b).unwrap().payload, "b");
        assert_eq!(registry.lookup(b).unwrap().status, TaskStatus::Queued);
    }

    #[test]
    fn ids_are_not_reused_after_pruning() {
        let mut registry = TaskRegistry::new(1);
        let a = submit(&mut registry, "a");
        registry.set_status(a, TaskStatus::Cancelled);
        let b = submit(&mut registry, "b");
        registry.set_status(b, TaskStatus::Cancelled);
        assert!(registry.lookup(a).is_none());
        let c = submit(&mut registry, "c");
        assert_eq!(c, TaskId(3));
    }

    #[test]
    fn full_lifecycle() {
        let mut registry = TaskRegistry::new(10);
        let id = submit(&mut registry, "work");
        assert!(registry.set_status(id, TaskStatus::Running));
        assert!(registry.set_status(id, TaskStatus::Completed));
        assert_eq!(registry.lookup(id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn pruning_keeps_live_tasks() {
        let mut registry = TaskRegistry::new(2);
        let live = submit(&mut registry, "live");
        for i in 0..5 {
            let id = submit(&mut registry, &format!("t{i}"));
            registry.set_status(id, TaskStatus::Cancelled);
        }
        assert!(registry.lookup(live).is_some());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid task transition"))]
    fn invalid_transition_is_rejected() {
        let mut registry = TaskRegistry::new(10);
        let id = submit(&mut registry, "work");
        registry.set_status(id, TaskStatus::Cancelled);
        assert!(!registry.set_status(id, TaskStatus::Running));
        assert_eq!(registry.lookup(id).unwrap().status, TaskStatus::Cancelled);
    }
}
