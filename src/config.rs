//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a worker waits on an empty queue before retiring.
    pub idle_timeout: Duration,
    /// Maximum wall-clock time for one backend invocation.
    pub task_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL when tearing down a process group.
    pub kill_grace: Duration,
    /// Number of payload characters shown in status previews.
    pub preview_len: usize,
    /// Terminal tasks kept in the registry before the oldest are dropped.
    pub max_retained_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300), // 5 minutes
            task_timeout: Duration::from_secs(600), // 10 minutes
            kill_grace: Duration::from_secs(5),
            preview_len: 30,
            max_retained_tasks: 1000,
        }
    }
}

/// External command that executes tasks.
///
/// The task text is written to the command's stdin.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Per-stream capture limit; output past this is read and discarded.
    pub max_capture_bytes: usize,
}

impl BackendConfig {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self, ConfigError> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| ConfigError::InvalidValue {
            key: "RELAY_BACKEND".to_string(),
            message: "command line is empty".to_string(),
        })?;
        Ok(Self::new(program, parts))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "gemini".to_string(),
            args: vec!["--yolo".into(), "--prompt".into(), "-".into()],
            max_capture_bytes: 256 * 1024,
        }
    }
}

/// Full process configuration, normally read from the environment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Root directory holding one sub-directory per project.
    pub workspace_dir: PathBuf,
    /// Directory searched for AGENT.md and INIT.md.
    pub home_dir: PathBuf,
    /// Telegram bot token; the CLI channel is used when absent.
    pub telegram_token: Option<SecretString>,
    /// Maximum length of one outgoing message before truncation.
    pub max_message_len: usize,
    pub scheduler: SchedulerConfig,
    pub backend: BackendConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("/workspace"),
            home_dir: PathBuf::from("/root"),
            telegram_token: None,
            max_message_len: 4000,
            scheduler: SchedulerConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            lookup(key)
                .map(|v| parse_number::<u64>(key, &v).map(Duration::from_secs))
                .transpose()
                .map(|v| v.unwrap_or(default))
        };
        let count = |key: &str, default: usize| -> Result<usize, ConfigError> {
            lookup(key)
                .map(|v| parse_number::<usize>(key, &v))
                .transpose()
                .map(|v| v.unwrap_or(default))
        };

        let scheduler = SchedulerConfig {
            idle_timeout: secs("RELAY_IDLE_TIMEOUT_SECS", defaults.scheduler.idle_timeout)?,
            task_timeout: secs("RELAY_TASK_TIMEOUT_SECS", defaults.scheduler.task_timeout)?,
            kill_grace: secs("RELAY_KILL_GRACE_SECS", defaults.scheduler.kill_grace)?,
            preview_len: count("RELAY_PREVIEW_LEN", defaults.scheduler.preview_len)?,
            max_retained_tasks: defaults.scheduler.max_retained_tasks,
        };

        let backend = match lookup("RELAY_BACKEND") {
            Some(line) => BackendConfig::parse(&line)?,
            None => defaults.backend,
        };

        Ok(Self {
            workspace_dir: lookup("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            home_dir: lookup("HOME").map(PathBuf::from).unwrap_or(defaults.home_dir),
            telegram_token: lookup("TELEGRAM_BOT_TOKEN")
                .filter(|t| !t.trim().is_empty())
                .map(SecretString::from),
            max_message_len: count("RELAY_MAX_MESSAGE_LEN", defaults.max_message_len)?,
            scheduler,
            backend,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}': {e}"),
    })
}
