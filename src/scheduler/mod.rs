//! Scheduler — per-key FIFO execution with on-demand workers.
//!
//! Components:
//! - `task` — TaskId, TaskStatus state machine, Task, Submission
//! - `registry` — id allocation and the id → task index
//! - `queue` — one FIFO per key
//! - `slot` — live handle of an executing task
//! - `status` — snapshot types
//! - `sink` — where results go
//! - `engine` — the Scheduler itself: submit, stop, snapshot, worker lifecycle

pub mod engine;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod slot;
pub mod status;
pub mod task;

pub use engine::{Scheduler, StopOutcome, StopTarget, SubmitReceipt};
pub use sink::{NullSink, ReplySink};
pub use status::{QueuedEntry, RunningEntry, Snapshot};
pub use task::{Submission, Task, TaskId, TaskStatus};
