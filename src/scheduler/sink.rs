//! Reply sink — where task results go.

use async_trait::async_trait;

use crate::executor::Outcome;

use super::task::Task;

/// Receives per-task notifications from workers.
///
/// `task_finished` is called exactly once per task a worker picked up, except
/// when a stop request interrupted the backend: the stop call is the
/// acknowledgement in that case.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// A worker picked the task up and is about to start the backend.
    async fn task_started(&self, _task: &Task) {}

    /// The task finished with `outcome`.
    async fn task_finished(&self, task: &Task, outcome: &Outcome);
}

/// Sink that drops everything. Useful for one-off runs.
pub struct NullSink;

#[async_trait]
impl ReplySink for NullSink {
    async fn task_finished(&self, _task: &Task, _outcome: &Outcome) {}
}
