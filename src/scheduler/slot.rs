//! Running slot — the live handle of an executing task.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::task::TaskId;

/// Present only while a task is executing.
#[derive(Debug)]
pub struct RunningSlot {
    pub task_id: TaskId,
    pub key: String,
    pub started_at: Instant,
    /// Cancelling this makes the executor tear down the backend's process group.
    pub handle: CancellationToken,
    pub stop_requested: bool,
}

impl RunningSlot {
    pub fn new(task_id: TaskId, key: impl Into<String>) -> Self {
        Self {
            task_id,
            key: key.into(),
            started_at: Instant::now(),
            handle: CancellationToken::new(),
            stop_requested: false,
        }
    }

    /// Mark the slot as stopped by request and signal the executor.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
        self.handle.cancel();
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_stop_cancels_handle() {
        let mut slot = RunningSlot::new(TaskId(1), "/w");
        let handle = slot.handle.clone();
        assert!(!handle.is_cancelled());
        slot.request_stop();
        assert!(slot.stop_requested);
        assert!(handle.is_cancelled());
    }
}
