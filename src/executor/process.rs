//! Backend process guard.
//!
//! The backend is started as the leader of a fresh process group so that
//! everything it forks can be signalled at once. The guard makes sure the
//! group is killed on every exit path, including drop.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::config::BackendConfig;
use crate::error::ExecError;

/// Everything the backend printed, plus its exit status.
#[derive(Debug)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

/// A running backend process group.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
    pgid: Option<Pid>,
    group_terminated: bool,
}

impl BackendProcess {
    /// Start the backend in `workdir` with piped stdio.
    pub fn spawn(config: &BackendConfig, workdir: &Path) -> Result<Self, ExecError> {
        if !workdir.is_dir() {
            return Err(ExecError::WorkdirMissing(workdir.to_path_buf()));
        }

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExecError::BackendNotFound {
                    program: config.program.clone(),
                }
            } else {
                ExecError::Spawn(e)
            }
        })?;

        // process_group(0) makes the child its own group leader: pgid == pid.
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        tracing::debug!(pid = ?child.id(), program = %config.program, "Backend spawned");

        Ok(Self {
            child,
            pgid,
            group_terminated: false,
        })
    }

    /// Write `input` to stdin, close it, and collect both output streams until exit.
    ///
    /// Streams are read concurrently with the write so a chatty backend cannot
    /// deadlock on a full pipe. Each stream keeps at most `max_capture` bytes.
    pub async fn communicate(&mut self, input: &str, max_capture: usize) -> io::Result<Captured> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let write = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(input.as_bytes()).await {
                    // Backend exited or closed stdin without reading everything.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                    Ok(()) => {}
                }
            }
            Ok(())
        };

        let (written, stdout, stderr) = tokio::join!(
            write,
            read_capped(stdout, max_capture),
            read_capped(stderr, max_capture)
        );
        written?;
        let (stdout, stderr) = (stdout?, stderr?);

        let status = self.child.wait().await?;
        Ok(Captured {
            stdout,
            stderr,
            status,
        })
    }

    /// SIGTERM the whole group, escalate to SIGKILL after `grace`, and reap the leader.
    pub async fn terminate(&mut self, grace: Duration) {
        self.signal_group(Signal::SIGTERM);

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            tracing::warn!(pid = ?self.child.id(), "Backend ignored SIGTERM; sending SIGKILL");
            self.signal_group(Signal::SIGKILL);
            if let Err(e) = self.child.wait().await {
                tracing::warn!("Failed to reap backend after SIGKILL: {e}");
            }
        }

        self.sweep_group();
        self.group_terminated = true;
    }

    /// Whether any process is left in the group.
    pub fn group_has_members(&self) -> bool {
        match self.pgid {
            Some(pgid) => killpg(pgid, None::<Signal>) != Err(Errno::ESRCH),
            None => false,
        }
    }

    /// SIGKILL stragglers that outlived the leader.
    ///
    /// Once the leader is reaped an empty group's id is free for reuse, so the
    /// group is only signalled while it still has members.
    fn sweep_group(&self) {
        let leader_reaped = self.child.id().is_none();
        if leader_reaped && !self.group_has_members() {
            return;
        }
        self.signal_group(Signal::SIGKILL);
    }

    fn signal_group(&self, signal: Signal) {
        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(pgid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = %pgid, ?signal, "killpg failed: {e}"),
        }
    }
}

impl Drop for BackendProcess {
    fn drop(&mut self) {
        if !self.group_terminated {
            self.sweep_group();
        }
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };

    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let take = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&buf[..take]);
        dropped += n - take;
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n... [{dropped} bytes not captured]"));
    }
    Ok(text)
}
