//! Per-key task scheduler.
//!
//! All shared state (registry, queues, worker set, running slots) lives in a
//! single [`State`] behind one mutex. Enqueue-then-wake and
//! idle-check-then-retire both run under that lock, so a task can never be
//! enqueued for a key whose worker has already decided to exit. Backend
//! invocations never hold the lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, SchedulerConfig};
use crate::error::SchedulerError;
use crate::executor::{Executor, Outcome};

use super::queue::KeyQueues;
use super::registry::TaskRegistry;
use super::sink::ReplySink;
use super::slot::RunningSlot;
use super::status::{QueuedEntry, RunningEntry, Snapshot};
use super::task::{Submission, Task, TaskId, TaskStatus};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returned by [`Scheduler::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    /// Tasks of the same key that will run before this one, including a running one.
    pub ahead: usize,
}

/// What to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    Task(TaskId),
    Key(String),
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// A termination signal was sent to `running` and/or `cancelled` were
    /// removed from the queue.
    Stopped {
        running: Option<TaskId>,
        cancelled: Vec<TaskId>,
    },
    /// Nothing matched: unknown id, already finished, or a key with no work.
    NotActive,
}

/// Registration of a live worker for one key.
#[derive(Debug, Clone)]
struct WorkerHandle {
    id: u64,
    wake: Arc<Notify>,
}

struct State {
    registry: TaskRegistry,
    queues: KeyQueues,
    workers: HashMap<String, WorkerHandle>,
    slots: HashMap<TaskId, RunningSlot>,
    next_worker_id: u64,
}

impl State {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            registry: TaskRegistry::new(config.max_retained_tasks),
            queues: KeyQueues::new(),
            workers: HashMap::new(),
            slots: HashMap::new(),
            next_worker_id: 0,
        }
    }

    fn running_for_key(&self, key: &str) -> Option<&RunningSlot> {
        self.slots.values().find(|slot| slot.key == key)
    }

    /// Wake the key's worker, or register a new one and return it for spawning.
    fn ensure_worker(&mut self, key: &str) -> Option<WorkerHandle> {
        if let Some(worker) = self.workers.get(key) {
            worker.wake.notify_one();
            return None;
        }

        self.next_worker_id += 1;
        let worker = WorkerHandle {
            id: self.next_worker_id,
            wake: Arc::new(Notify::new()),
        };
        self.workers.insert(key.to_string(), worker.clone());
        Some(worker)
    }

    /// Deregister `worker_id` for `key`. Returns false if it was not the registered worker.
    fn retire_worker(&mut self, key: &str, worker_id: u64) -> bool {
        match self.workers.get(key) {
            Some(worker) if worker.id == worker_id => {
                self.workers.remove(key);
                true
            }
            other => {
                tracing::error!(
                    key,
                    worker = worker_id,
                    registered = ?other.map(|w| w.id),
                    "Worker retiring but not registered for its key"
                );
                debug_assert!(false, "worker {worker_id} not registered for {key}");
                false
            }
        }
    }

    /// Pop the key's next task, mark it running and give it a slot.
    fn start_next(&mut self, key: &str) -> Option<(Task, CancellationToken)> {
        if let Some(existing) = self.running_for_key(key) {
            tracing::error!(
                key,
                task_id = %existing.task_id,
                "Key already has a running task; refusing to start another"
            );
            debug_assert!(false, "two running tasks for key {key}");
            return None;
        }

        let id = self.queues.dequeue_front(key)?;
        self.registry.set_status(id, TaskStatus::Running);
        let task = self.registry.lookup(id)?.clone();

        let slot = RunningSlot::new(id, key);
        let cancel = slot.handle.clone();
        self.slots.insert(id, slot);
        Some((task, cancel))
    }

    fn stop_task(&mut self, id: TaskId) -> StopOutcome {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.request_stop();
            return StopOutcome::Stopped {
                running: Some(id),
                cancelled: Vec::new(),
            };
        }

        let Some(task) = self.registry.lookup(id) else {
            return StopOutcome::NotActive;
        };
        if task.status != TaskStatus::Queued {
            return StopOutcome::NotActive;
        }

        let key = task.key.clone();
        if !self.queues.remove_by_id(&key, id) {
            return StopOutcome::NotActive;
        }
        self.registry.set_status(id, TaskStatus::Cancelled);
        StopOutcome::Stopped {
            running: None,
            cancelled: vec![id],
        }
    }

    fn stop_key(&mut self, key: &str) -> StopOutcome {
        let running = self
            .slots
            .values_mut()
            .find(|slot| slot.key == key)
            .map(|slot| {
                slot.request_stop();
                slot.task_id
            });

        let cancelled = self.queues.drain_key(key);
        for id in &cancelled {
            self.registry.set_status(*id, TaskStatus::Cancelled);
        }

        if running.is_none() && cancelled.is_empty() {
            StopOutcome::NotActive
        } else {
            StopOutcome::Stopped { running, cancelled }
        }
    }

    fn keys_with_work(&self) -> BTreeSet<String> {
        self.queues
            .keys()
            .map(str::to_string)
            .chain(self.slots.values().map(|slot| slot.key.clone()))
            .collect()
    }
}

struct Inner {
    state: Mutex<State>,
    config: SchedulerConfig,
    executor: Executor,
    sink: Arc<dyn ReplySink>,
}

impl Inner {
    /// Run one dequeued task and settle its slot and status.
    async fn execute(&self, task: Task, cancel: CancellationToken) {
        tracing::info!(task_id = %task.id, key = %task.key, "Task started");
        self.sink.task_started(&task).await;

        let outcome = self
            .executor
            .run(Path::new(&task.key), task.backend_input(), &cancel)
            .await;

        let finished = {
            let mut state = self.state.lock().await;
            let slot = state.slots.remove(&task.id);
            let stop_requested = slot.as_ref().is_some_and(|slot| slot.stop_requested);
            let status = final_status(stop_requested, &outcome);
            state.registry.set_status(task.id, status);

            tracing::info!(
                task_id = %task.id,
                key = %task.key,
                outcome = outcome.label(),
                status = %status,
                stop_requested,
                elapsed_ms = slot.map_or(0, |slot| slot.elapsed().as_millis() as u64),
                "Task finished"
            );

            Task { status, ..task }
        };

        // A requested stop was already acknowledged to whoever asked for it.
        if finished.status != TaskStatus::Stopped {
            self.sink.task_finished(&finished, &outcome).await;
        }
    }
}

/// Status a task settles in once its backend run returns.
///
/// A stop that lands after the backend already exited on its own does not
/// discard the result.
fn final_status(stop_requested: bool, outcome: &Outcome) -> TaskStatus {
    if stop_requested && *outcome == Outcome::Stopped {
        TaskStatus::Stopped
    } else {
        TaskStatus::Completed
    }
}

/// Per-key FIFO scheduler with on-demand workers.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, backend: BackendConfig, sink: Arc<dyn ReplySink>) -> Self {
        let executor = Executor::new(backend, &config);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new(&config)),
                config,
                executor,
                sink,
            }),
        }
    }

    /// Queue a task for its key and make sure the key has a worker.
    pub async fn submit(&self, submission: Submission) -> Result<SubmitReceipt, SchedulerError> {
        if submission.key.trim().is_empty() {
            return Err(SchedulerError::EmptyKey);
        }
        if submission.payload.trim().is_empty() {
            return Err(SchedulerError::EmptyPayload);
        }

        let (receipt, key, spawn) = {
            let mut state = self.inner.state.lock().await;
            let task = state.registry.allocate(submission);
            let queued = state.queues.enqueue(&task.key, task.id);
            let running = usize::from(state.running_for_key(&task.key).is_some());
            let spawn = state.ensure_worker(&task.key);

            tracing::info!(task_id = %task.id, key = %task.key, queued, "Task queued");
            let receipt = SubmitReceipt {
                task_id: task.id,
                ahead: queued - 1 + running,
            };
            (receipt, task.key, spawn)
        };

        if let Some(worker) = spawn {
            spawn_worker(Arc::clone(&self.inner), key, worker);
        }
        Ok(receipt)
    }

    /// Stop a running task, cancel queued ones, or both for a key.
    pub async fn stop(&self, target: StopTarget) -> StopOutcome {
        let mut state = self.inner.state.lock().await;
        let outcome = match &target {
            StopTarget::Task(id) => state.stop_task(*id),
            StopTarget::Key(key) => state.stop_key(key),
        };
        tracing::info!(?target, ?outcome, "Stop requested");
        outcome
    }

    /// Stop everything on every key.
    pub async fn stop_all(&self) -> Vec<StopOutcome> {
        let mut state = self.inner.state.lock().await;
        let keys = state.keys_with_work();
        keys.iter().map(|key| state.stop_key(key)).collect()
    }

    /// Consistent view of running and queued tasks.
    pub async fn snapshot(&self) -> Snapshot {
        let preview_len = self.inner.config.preview_len;
        let state = self.inner.state.lock().await;

        let mut running: Vec<RunningEntry> = state
            .slots
            .values()
            .filter_map(|slot| {
                let task = state.registry.lookup(slot.task_id)?;
                Some(RunningEntry {
                    id: slot.task_id,
                    key: slot.key.clone(),
                    preview: task.preview(preview_len),
                    elapsed_secs: slot.elapsed().as_secs(),
                })
            })
            .collect();
        running.sort_by_key(|entry| entry.id);

        let queued: BTreeMap<String, Vec<QueuedEntry>> = state
            .queues
            .keys()
            .map(|key| {
                let entries = state
                    .queues
                    .iter_key(key)
                    .filter_map(|id| {
                        state.registry.lookup(id).map(|task| QueuedEntry {
                            id,
                            preview: task.preview(preview_len),
                        })
                    })
                    .collect();
                (key.to_string(), entries)
            })
            .collect();

        Snapshot { running, queued }
    }

    /// Look up a task by id. Old finished tasks may have been dropped.
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().await.registry.lookup(id).cloned()
    }

    /// Keys with queued work or a running task.
    pub async fn keys_with_work(&self) -> BTreeSet<String> {
        self.inner.state.lock().await.keys_with_work()
    }

    /// Number of keys with a live worker.
    pub async fn worker_count(&self) -> usize {
        self.inner.state.lock().await.workers.len()
    }

    pub async fn has_worker(&self, key: &str) -> bool {
        self.inner.state.lock().await.workers.contains_key(key)
    }

    /// Wait until no key has work, up to `within`. Returns whether it got there.
    pub async fn wait_idle(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if self.inner.state.lock().await.keys_with_work().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}

/// Start a registered worker and supervise it.
fn spawn_worker(inner: Arc<Inner>, key: String, worker: WorkerHandle) {
    let worker_id = worker.id;
    let join = tokio::spawn(run_worker(Arc::clone(&inner), key.clone(), worker));

    tokio::spawn(async move {
        if let Err(e) = join.await {
            tracing::error!(%key, worker = worker_id, "Worker died: {e}");
            recover_worker(inner, key, worker_id).await;
        }
    });
}

/// Drain one key's queue, retiring after `idle_timeout` with nothing to do.
async fn run_worker(inner: Arc<Inner>, key: String, worker: WorkerHandle) {
    tracing::info!(%key, worker = worker.id, "Worker started");

    loop {
        let next = inner.state.lock().await.start_next(&key);
        if let Some((task, cancel)) = next {
            inner.execute(task, cancel).await;
            continue;
        }

        // A notify_one() issued while nobody is waiting leaves a permit, so a
        // submit landing between the unlock above and this wait still wakes us.
        let woken = tokio::time::timeout(inner.config.idle_timeout, worker.wake.notified())
            .await
            .is_ok();
        if woken {
            continue;
        }

        let mut state = inner.state.lock().await;
        if state.queues.is_empty(&key) {
            state.retire_worker(&key, worker.id);
            tracing::info!(%key, worker = worker.id, "Worker idle; retiring");
            return;
        }
    }
}

/// Clean up after a worker that panicked and restart one if work remains.
///
/// Tasks the dead worker was running get a crash reply unless a stop had
/// already been acknowledged for them.
async fn recover_worker(inner: Arc<Inner>, key: String, worker_id: u64) {
    let (orphans, respawn) = {
        let mut state = inner.state.lock().await;
        if !state.retire_worker(&key, worker_id) {
            return;
        }

        let ids: Vec<TaskId> = state
            .slots
            .values()
            .filter(|slot| slot.key == key)
            .map(|slot| slot.task_id)
            .collect();

        let mut orphans = Vec::new();
        for id in ids {
            let Some(slot) = state.slots.remove(&id) else {
                continue;
            };
            slot.handle.cancel();
            let status = if slot.stop_requested {
                TaskStatus::Stopped
            } else {
                TaskStatus::Completed
            };
            state.registry.set_status(id, status);
            tracing::warn!(task_id = %id, %key, %status, "Settled task orphaned by dead worker");

            if status == TaskStatus::Completed {
                orphans.extend(state.registry.lookup(id).cloned());
            }
        }

        let respawn = if state.queues.is_empty(&key) {
            None
        } else {
            state.ensure_worker(&key)
        };
        (orphans, respawn)
    };

    if let Some(worker) = respawn {
        spawn_worker(Arc::clone(&inner), key, worker);
    }

    let outcome = Outcome::Crashed {
        error: "worker died".into(),
    };
    for task in orphans {
        inner.sink.task_finished(&task, &outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    struct Recorder(mpsc::UnboundedSender<(TaskId, Outcome)>);

    #[async_trait]
    impl ReplySink for Recorder {
        async fn task_finished(&self, task: &Task, outcome: &Outcome) {
            let _ = self.0.send((task.id, outcome.clone()));
        }
    }

    /// Panics in `task_started` the first time it is called.
    struct PanicsOnFirstStart {
        tripped: AtomicBool,
        tx: mpsc::UnboundedSender<(TaskId, Outcome)>,
    }

    #[async_trait]
    impl ReplySink for PanicsOnFirstStart {
        async fn task_started(&self, _task: &Task) {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("sink failed on task start");
            }
        }

        async fn task_finished(&self, task: &Task, outcome: &Outcome) {
            let _ = self.tx.send((task.id, outcome.clone()));
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            idle_timeout: Duration::from_millis(100),
            task_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(200),
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(script: &str) -> (Scheduler, mpsc::UnboundedReceiver<(TaskId, Outcome)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            test_config(),
            BackendConfig::new("sh", ["-c", script]),
            Arc::new(Recorder(tx)),
        );
        (scheduler, rx)
    }

    async fn wait_running(scheduler: &Scheduler) {
        for _ in 0..200 {
            if !scheduler.snapshot().await.running.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no task started");
    }

    fn key_of(dir: &tempfile::TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn submit_rejects_empty_input() {
        let (scheduler, _rx) = scheduler("cat");
        assert_eq!(
            scheduler.submit(Submission::new("", "x")).await,
            Err(SchedulerError::EmptyKey)
        );
        assert_eq!(
            scheduler.submit(Submission::new("/tmp", "  ")).await,
            Err(SchedulerError::EmptyPayload)
        );
        assert!(scheduler.snapshot().await.is_idle());
        assert_eq!(scheduler.worker_count().await, 0);
    }

    #[tokio::test]
    async fn submit_reports_tasks_ahead() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _rx) = scheduler("sleep 5");
        let key = key_of(&dir);

        let first = scheduler.submit(Submission::new(&key, "one")).await.unwrap();
        let second = scheduler.submit(Submission::new(&key, "two")).await.unwrap();
        assert_eq!(first.ahead, 0);
        assert_eq!(second.ahead, 1);
        assert!(first.task_id < second.task_id);

        scheduler.stop(StopTarget::Key(key)).await;
    }

    #[tokio::test]
    async fn worker_retires_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, mut rx) = scheduler("cat");
        let key = key_of(&dir);

        scheduler.submit(Submission::new(&key, "hi")).await.unwrap();
        assert!(scheduler.has_worker(&key).await);
        let (_, outcome) = rx.recv().await.unwrap();
        assert!(matches!(outcome, Outcome::Completed { .. }));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!scheduler.has_worker(&key).await);
    }

    #[tokio::test]
    async fn stop_unknown_task_is_not_active() {
        let (scheduler, _rx) = scheduler("cat");
        assert_eq!(scheduler.stop(StopTarget::Task(TaskId(99))).await, StopOutcome::NotActive);
        assert_eq!(
            scheduler.stop(StopTarget::Key("/nowhere".into())).await,
            StopOutcome::NotActive
        );
    }

    #[tokio::test]
    async fn stop_key_stops_running_and_cancels_queued() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _rx) = scheduler("sleep 30");
        let key = key_of(&dir);

        let a = scheduler.submit(Submission::new(&key, "a")).await.unwrap().task_id;
        let b = scheduler.submit(Submission::new(&key, "b")).await.unwrap().task_id;
        let c = scheduler.submit(Submission::new(&key, "c")).await.unwrap().task_id;

        wait_running(&scheduler).await;

        let outcome = scheduler.stop(StopTarget::Key(key.clone())).await;
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                running: Some(a),
                cancelled: vec![b, c],
            }
        );
        assert_eq!(scheduler.task(b).await.unwrap().status, TaskStatus::Cancelled);

        for _ in 0..200 {
            if scheduler.task(a).await.unwrap().status == TaskStatus::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.task(a).await.unwrap().status, TaskStatus::Stopped);
        assert!(scheduler.keys_with_work().await.is_empty());
    }

    #[tokio::test]
    async fn stop_all_then_wait_idle() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let (scheduler, _rx) = scheduler("sleep 30");

        scheduler.submit(Submission::new(key_of(&first), "a")).await.unwrap();
        scheduler.submit(Submission::new(key_of(&first), "b")).await.unwrap();
        scheduler.submit(Submission::new(key_of(&second), "c")).await.unwrap();

        let outcomes = scheduler.stop_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| *o != StopOutcome::NotActive));
        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);
    }

    #[test]
    fn only_an_interrupted_run_counts_as_stopped() {
        let done = Outcome::Completed {
            stdout: "out".into(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        let timed_out = Outcome::TimedOut {
            after: Duration::from_secs(1),
        };
        assert_eq!(final_status(true, &Outcome::Stopped), TaskStatus::Stopped);
        assert_eq!(final_status(true, &done), TaskStatus::Completed);
        assert_eq!(final_status(true, &timed_out), TaskStatus::Completed);
        assert_eq!(final_status(false, &done), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn stop_after_backend_exit_keeps_result() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, mut rx) = scheduler("sleep 0.3; cat");
        let key = key_of(&dir);

        let id = scheduler.submit(Submission::new(&key, "late")).await.unwrap().task_id;
        wait_running(&scheduler).await;

        // Hold the state lock past the backend's exit so the stop lands
        // before the worker can settle the run.
        {
            let mut state = scheduler.inner.state.lock().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(
                state.stop_task(id),
                StopOutcome::Stopped {
                    running: Some(id),
                    cancelled: Vec::new(),
                }
            );
        }

        let (got, outcome) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, id);
        assert!(matches!(outcome, Outcome::Completed { ref stdout, .. } if stdout == "late"));
        assert_eq!(scheduler.task(id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn dead_worker_is_replaced_and_its_task_answered() {
        let dir = tempfile::tempdir().unwrap();
        let key = key_of(&dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(PanicsOnFirstStart {
            tripped: AtomicBool::new(false),
            tx,
        });
        let scheduler = Scheduler::new(test_config(), BackendConfig::new("sh", ["-c", "cat"]), sink);

        let a = scheduler.submit(Submission::new(&key, "a")).await.unwrap().task_id;
        let b = scheduler.submit(Submission::new(&key, "b")).await.unwrap().task_id;

        let mut replies = HashMap::new();
        while replies.len() < 2 {
            let (id, outcome) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(replies.insert(id, outcome).is_none(), "task {id} answered twice");
        }

        assert_eq!(
            replies[&a],
            Outcome::Crashed {
                error: "worker died".into()
            }
        );
        assert!(matches!(&replies[&b], Outcome::Completed { stdout, .. } if stdout == "b"));
        assert_eq!(scheduler.task(a).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(scheduler.task(b).await.unwrap().status, TaskStatus::Completed);
        assert!(scheduler.snapshot().await.is_idle());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!scheduler.has_worker(&key).await);
    }
}
