//! Agent rules prefix and the startup init file.
//!
//! `AGENT.md` in the home directory is prepended to every task's backend
//! input. It is read at submission time so edits apply to the next task.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

/// Well-known file names under the home directory.
pub mod paths {
    pub const AGENT_RULES: &str = "AGENT.md";
    pub const INIT: &str = "INIT.md";
}

/// Result of looking for the rules file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rules {
    /// No rules file; input passes through unchanged.
    Absent,
    Loaded(String),
    /// The file exists but could not be read. Carries the error text.
    Unreadable(String),
}

impl Rules {
    /// Read `path` if it is a regular file.
    pub async fn load(path: &Path) -> Self {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Self::Absent,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::Absent,
            Err(e) => return Self::unreadable(path, e),
        }

        match fs::read_to_string(path).await {
            Ok(text) => {
                tracing::debug!(path = %path.display(), bytes = text.len(), "Loaded agent rules");
                Self::Loaded(text)
            }
            Err(e) => Self::unreadable(path, e),
        }
    }

    fn unreadable(path: &Path, e: io::Error) -> Self {
        tracing::error!(path = %path.display(), "Failed to read agent rules: {e}");
        Self::Unreadable(e.to_string())
    }

    /// Backend input for `text`, with the rules folded in front when loaded.
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Loaded(rules) => {
                format!("--- Agent Rules ---\n{rules}\n--- End Rules ---\n\n{text}")
            }
            Self::Absent | Self::Unreadable(_) => text.to_string(),
        }
    }

    /// User-facing warning, if reading failed.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Unreadable(error) => Some(format!(
                "⚠️ Warning: Found {} but failed to read it: {error}",
                paths::AGENT_RULES
            )),
            _ => None,
        }
    }
}

/// Location of the rules and init files.
#[derive(Debug, Clone)]
pub struct HomeFiles {
    home: PathBuf,
}

impl HomeFiles {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn rules_path(&self) -> PathBuf {
        self.home.join(paths::AGENT_RULES)
    }

    pub fn init_path(&self) -> PathBuf {
        self.home.join(paths::INIT)
    }

    pub async fn rules(&self) -> Rules {
        Rules::load(&self.rules_path()).await
    }

    /// Prompt for the startup run, if an init file exists.
    pub async fn init_prompt(&self) -> Option<String> {
        let path = self.init_path();
        let is_file = fs::metadata(&path).await.is_ok_and(|m| m.is_file());
        is_file.then(|| format!("Initialize according to @{}", path.display()))
    }
}
