//! Executor — runs one task against the external backend.
//!
//! Enforces the task timeout and honours cancellation by tearing down the
//! backend's whole process group. Every failure is folded into an [`Outcome`];
//! nothing here returns an error to the caller.

pub mod process;

use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, SchedulerConfig};
use crate::error::ExecError;

pub use process::{BackendProcess, Captured};

/// How a backend invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The backend exited on its own.
    Completed {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// The backend ran past the timeout and was killed.
    TimedOut { after: Duration },
    /// The run was cancelled by a stop request.
    Stopped,
    /// The backend binary could not be found.
    BackendUnavailable { program: String },
    /// Anything else that went wrong starting or talking to the backend.
    Crashed { error: String },
}

impl Outcome {
    /// Short machine-friendly label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::TimedOut { .. } => "timed_out",
            Self::Stopped => "stopped",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Crashed { .. } => "crashed",
        }
    }
}

/// Runs backend invocations with a timeout and kill-on-cancel.
#[derive(Debug, Clone)]
pub struct Executor {
    backend: BackendConfig,
    timeout: Duration,
    kill_grace: Duration,
}

impl Executor {
    pub fn new(backend: BackendConfig, config: &SchedulerConfig) -> Self {
        Self {
            backend,
            timeout: config.task_timeout,
            kill_grace: config.kill_grace,
        }
    }

    /// Run the backend in `workdir`, feeding it `input`.
    ///
    /// Cancelling `cancel` terminates the process group and yields
    /// [`Outcome::Stopped`]. The process group is always gone when this returns.
    pub async fn run(&self, workdir: &Path, input: &str, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Stopped;
        }

        let start = Instant::now();
        let mut process = match BackendProcess::spawn(&self.backend, workdir) {
            Ok(process) => process,
            Err(ExecError::BackendNotFound { program }) => {
                tracing::warn!(%program, "Execution backend not found");
                return Outcome::BackendUnavailable { program };
            }
            Err(e) => {
                tracing::warn!(workdir = %workdir.display(), "Backend failed to start: {e}");
                return Outcome::Crashed {
                    error: e.to_string(),
                };
            }
        };

        enum Ended {
            Finished(std::io::Result<Captured>),
            TimedOut,
            Cancelled,
        }

        let ended = tokio::select! {
            result = tokio::time::timeout(
                self.timeout,
                process.communicate(input, self.backend.max_capture_bytes),
            ) => match result {
                Ok(finished) => Ended::Finished(finished),
                Err(_) => Ended::TimedOut,
            },
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        let outcome = match ended {
            Ended::Finished(Ok(captured)) => Outcome::Completed {
                stdout: captured.stdout,
                stderr: captured.stderr,
                exit_code: captured.status.code(),
            },
            Ended::Finished(Err(e)) => {
                process.terminate(self.kill_grace).await;
                Outcome::Crashed {
                    error: ExecError::Io(e).to_string(),
                }
            }
            Ended::TimedOut => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Backend timed out; killing process group");
                process.terminate(self.kill_grace).await;
                Outcome::TimedOut {
                    after: self.timeout,
                }
            }
            Ended::Cancelled => {
                tracing::info!("Backend stop requested; killing process group");
                process.terminate(self.kill_grace).await;
                Outcome::Stopped
            }
        };

        tracing::debug!(
            outcome = outcome.label(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Backend run finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(script: &str, timeout: Duration) -> Executor {
        let config = SchedulerConfig {
            task_timeout: timeout,
            kill_grace: Duration::from_millis(500),
            ..SchedulerConfig::default()
        };
        Executor::new(BackendConfig::new("sh", ["-c", script]), &config)
    }

    #[tokio::test]
    async fn completed_outcome_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor("cat; echo warn >&2; exit 3", Duration::from_secs(5));
        let outcome = exec.run(dir.path(), "payload", &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            Outcome::Completed {
                stdout: "payload".into(),
                stderr: "warn\n".into(),
                exit_code: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let exec = executor("cat marker.txt", Duration::from_secs(5));
        let outcome = exec.run(dir.path(), "", &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Completed { ref stdout, .. } if stdout == "here"));
    }

    #[tokio::test]
    async fn timeout_kills_backend() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor("sleep 30", Duration::from_millis(200));
        let start = Instant::now();
        let outcome = exec.run(dir.path(), "", &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            Outcome::TimedOut {
                after: Duration::from_millis(200)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_stops_backend() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor("sleep 30", Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let outcome = exec.run(dir.path(), "", &cancel).await;
        assert_eq!(outcome, Outcome::Stopped);
    }

    #[tokio::test]
    async fn pre_cancelled_run_never_starts() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor("touch started", Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(exec.run(dir.path(), "", &cancel).await, Outcome::Stopped);
        assert!(!dir.path().join("started").exists());
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Executor::new(
            BackendConfig::new("no-such-relay-backend", Vec::<String>::new()),
            &SchedulerConfig::default(),
        );
        let outcome = exec.run(dir.path(), "x", &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            Outcome::BackendUnavailable {
                program: "no-such-relay-backend".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_workdir_is_a_crash() {
        let exec = executor("true", Duration::from_secs(5));
        let outcome = exec
            .run(Path::new("/nonexistent/relay/key"), "", &CancellationToken::new())
            .await;
        assert!(matches!(outcome, Outcome::Crashed { .. }));
    }
}
