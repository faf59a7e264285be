//! Task record and its status state machine.

use std::fmt;

use chrono::{DateTime, Utc};

/// Process-lifetime unique, strictly increasing task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    /// Accepts `12` or `#12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits.strip_prefix('#').unwrap_or(digits);
        digits.parse().map(TaskId)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting in its key's queue.
    Queued,
    /// Dequeued by the key's worker and handed to the backend.
    Running,
    /// Ran to an end: normal exit, timeout, crash or missing backend.
    Completed,
    /// Removed from the queue before it started.
    Cancelled,
    /// Terminated while running because a stop was requested.
    Stopped,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Queued, Cancelled) | (Running, Completed) | (Running, Stopped)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Stopped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A request to run some text against a key.
///
/// `payload` is what the user typed and what status previews show. `input`
/// is what the backend receives; it differs when a rules prefix was folded in.
#[derive(Debug, Clone)]
pub struct Submission {
    pub key: String,
    pub payload: String,
    pub input: Option<String>,
    /// Opaque address for replies (a chat id for Telegram).
    pub reply_to: String,
}

impl Submission {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            input: None,
            reply_to: String::new(),
        }
    }

    /// Set the text actually sent to the backend.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Set the reply address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }
}

/// A task owned by the registry.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub key: String,
    pub payload: String,
    /// Backend input; `None` means the payload itself.
    pub input: Option<String>,
    pub reply_to: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Text handed to the backend's stdin.
    pub fn backend_input(&self) -> &str {
        self.input.as_deref().unwrap_or(&self.payload)
    }

    /// Payload shortened to `max_chars`, with an ellipsis when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.payload, max_chars)
    }
}

/// Truncate text on a char boundary for display.
pub fn preview(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        format!("{}...", single_line.chars().take(max_chars).collect::<String>())
    }
}
