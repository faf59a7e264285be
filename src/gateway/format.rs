//! Message rendering and the channel-backed reply sink.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channels::Channel;
use crate::executor::Outcome;
use crate::scheduler::{ReplySink, Snapshot, StopOutcome, SubmitReceipt, Task, TaskId};
use crate::workspace::Workspace;

pub const TRUNCATION_MARKER: &str = "...\n[Output Truncated]";

/// Cap `text` at `max_chars`, appending the truncation marker when cut.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
    }
}

pub fn render_receipt(receipt: &SubmitReceipt, project: &str) -> String {
    let noun = if receipt.ahead == 1 { "task" } else { "tasks" };
    format!(
        "📝 Task #{} queued for {project}\n{} {noun} ahead in this folder.",
        receipt.task_id, receipt.ahead
    )
}

pub fn render_started(task: &Task, project: &str) -> String {
    format!("⚙️ Executing task #{}...\nDirectory: {project}", task.id)
}

pub fn render_outcome(task_id: TaskId, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Completed {
            stdout,
            stderr,
            exit_code,
        } => {
            let mut reply = format!("✅ Task #{task_id} Completed\n\n[Output]:\n{stdout}");
            if !stderr.is_empty() {
                let _ = write!(reply, "\n\n[Error/Warning]:\n{stderr}");
            }
            match exit_code {
                Some(0) => {}
                Some(code) => {
                    let _ = write!(reply, "\n\n[Exit code]: {code}");
                }
                None => reply.push_str("\n\n[Exit code]: killed by signal"),
            }
            reply
        }
        Outcome::TimedOut { after } => format!(
            "❌ Task #{task_id} Execution Failed: Task timed out after {} seconds.",
            after.as_secs()
        ),
        Outcome::Stopped => format!("🛑 Task #{task_id} stopped."),
        Outcome::BackendUnavailable { program } => format!(
            "❌ Task #{task_id} Execution Failed: '{program}' not found. \
             Please ensure it is installed and in PATH."
        ),
        Outcome::Crashed { error } => format!("❌ Task #{task_id} Execution Crashed: {error}"),
    }
}

pub fn render_status(snapshot: &Snapshot, workspace: &Workspace) -> String {
    if snapshot.is_idle() {
        return "📭 No tasks running or queued.".to_string();
    }

    let mut out = String::from("📊 *System Status*\n\n");

    if !snapshot.running.is_empty() {
        out.push_str("🏃 *Running Tasks:*\n");
        for entry in &snapshot.running {
            let _ = writeln!(
                out,
                "- #{} `{}`: {} ({}s)",
                entry.id,
                workspace.display_name(&entry.key),
                entry.preview,
                entry.elapsed_secs
            );
        }
        out.push('\n');
    }

    if !snapshot.queued.is_empty() {
        out.push_str("⏳ *Queued Tasks:*\n");
        for (key, entries) in &snapshot.queued {
            let _ = writeln!(
                out,
                "- `{}`: {} waiting",
                workspace.display_name(key),
                entries.len()
            );
            for entry in entries {
                let _ = writeln!(out, "  #{} {}", entry.id, entry.preview);
            }
        }
    }

    out.trim_end().to_string()
}

pub fn render_stop(outcome: &StopOutcome, target: &str) -> String {
    match outcome {
        StopOutcome::NotActive => format!("ℹ️ Nothing to stop for {target}: not running or queued."),
        StopOutcome::Stopped { running, cancelled } => {
            let mut parts = Vec::new();
            if let Some(id) = running {
                parts.push(format!("🛑 Stop signal sent to running task #{id}."));
            }
            if !cancelled.is_empty() {
                let ids: Vec<String> = cancelled.iter().map(|id| format!("#{id}")).collect();
                parts.push(format!(
                    "🗑 Removed {} queued task(s): {}",
                    cancelled.len(),
                    ids.join(", ")
                ));
            }
            parts.join("\n")
        }
    }
}

/// Delivers worker notifications to the chat that submitted the task.
pub struct ChannelSink {
    channel: Arc<dyn Channel>,
    workspace: Workspace,
    max_message_len: usize,
}

impl ChannelSink {
    pub fn new(channel: Arc<dyn Channel>, workspace: Workspace, max_message_len: usize) -> Self {
        Self {
            channel,
            workspace,
            max_message_len,
        }
    }

    async fn send(&self, task: &Task, text: String) {
        let text = truncate_message(&text, self.max_message_len);
        if let Err(e) = self.channel.send_to(&task.reply_to, &text).await {
            tracing::warn!(task_id = %task.id, channel = self.channel.name(), "Failed to deliver reply: {e}");
        }
    }
}

#[async_trait]
impl ReplySink for ChannelSink {
    async fn task_started(&self, task: &Task) {
        let project = self.workspace.display_name(&task.key);
        self.send(task, render_started(task, &project)).await;
    }

    async fn task_finished(&self, task: &Task, outcome: &Outcome) {
        self.send(task, render_outcome(task.id, outcome)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::scheduler::{QueuedEntry, RunningEntry};

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate_message("hello", 10), "hello");
        assert_eq!(truncate_message("hello", 5), "hello");
    }

    #[test]
    fn truncate_long_text_adds_marker() {
        let text = "x".repeat(4100);
        let out = truncate_message(&text, 4000);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 4000 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate_message("ééé", 2), format!("éé{TRUNCATION_MARKER}"));
    }

    #[test]
    fn receipt_text() {
        let receipt = SubmitReceipt {
            task_id: TaskId(7),
            ahead: 2,
        };
        assert_eq!(
            render_receipt(&receipt, "api"),
            "📝 Task #7 queued for api\n2 tasks ahead in this folder."
        );
    }

    #[test]
    fn completed_outcome_includes_stderr_and_exit_code() {
        let outcome = Outcome::Completed {
            stdout: "done".into(),
            stderr: "careful".into(),
            exit_code: Some(1),
        };
        let text = render_outcome(TaskId(3), &outcome);
        assert!(text.starts_with("✅ Task #3 Completed\n\n[Output]:\ndone"));
        assert!(text.contains("[Error/Warning]:\ncareful"));
        assert!(text.contains("[Exit code]: 1"));
    }

    #[test]
    fn clean_completion_has_no_extras() {
        let outcome = Outcome::Completed {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert_eq!(render_outcome(TaskId(1), &outcome), "✅ Task #1 Completed\n\n[Output]:\nok");
    }

    #[test]
    fn failure_outcomes() {
        let timeout = render_outcome(
            TaskId(2),
            &Outcome::TimedOut {
                after: Duration::from_secs(600),
            },
        );
        assert!(timeout.contains("timed out after 600 seconds"));

        let missing = render_outcome(
            TaskId(2),
            &Outcome::BackendUnavailable {
                program: "gemini".into(),
            },
        );
        assert!(missing.contains("'gemini' not found"));
    }

    #[test]
    fn idle_status() {
        let ws = Workspace::new("/workspace");
        assert_eq!(render_status(&Snapshot::default(), &ws), "📭 No tasks running or queued.");
    }

    #[test]
    fn busy_status_lists_running_and_queued() {
        let ws = Workspace::new("/workspace");
        let mut queued = BTreeMap::new();
        queued.insert(
            "/workspace/alpha".to_string(),
            vec![
                QueuedEntry {
                    id: TaskId(2),
                    preview: "second".into(),
                },
                QueuedEntry {
                    id: TaskId(3),
                    preview: "third".into(),
                },
            ],
        );
        let snapshot = Snapshot {
            running: vec![RunningEntry {
                id: TaskId(1),
                key: "/workspace/alpha".into(),
                preview: "first".into(),
                elapsed_secs: 4,
            }],
            queued,
        };

        let text = render_status(&snapshot, &ws);
        assert!(text.contains("- #1 `alpha`: first (4s)"));
        assert!(text.contains("- `alpha`: 2 waiting"));
        assert!(text.contains("  #2 second\n  #3 third"));
    }

    #[test]
    fn stop_texts() {
        assert!(render_stop(&StopOutcome::NotActive, "#9").contains("Nothing to stop for #9"));
        let text = render_stop(
            &StopOutcome::Stopped {
                running: Some(TaskId(4)),
                cancelled: vec![TaskId(5), TaskId(6)],
            },
            "alpha",
        );
        assert!(text.contains("running task #4"));
        assert!(text.contains("2 queued task(s): #5, #6"));
    }
}
