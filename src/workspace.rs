//! Project directories under the workspace root.
//!
//! Each immediate subdirectory of the root is a project. The root itself is
//! also a valid place to run tasks. A task's scheduler key is the absolute
//! path of the directory it runs in.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs;

use crate::error::WorkspaceError;

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("project name pattern"));

/// Check a project name: ASCII letters, digits, `_` and `-` only.
pub fn validate_project_name(name: &str) -> Result<(), WorkspaceError> {
    if PROJECT_NAME.is_match(name) {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidName(name.to_string()))
    }
}

/// The workspace root and its projects.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scheduler key for the root directory.
    pub fn root_key(&self) -> String {
        key_for(&self.root)
    }

    /// Create the root directory if it is missing.
    pub async fn ensure_root(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Project names, sorted. A missing root yields an empty list.
    pub async fn list_projects(&self) -> Result<Vec<String>, WorkspaceError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        let mut read_dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                projects.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// Create a new, empty project directory.
    pub async fn create_project(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        validate_project_name(name)?;
        let path = self.root.join(name);
        if fs::try_exists(&path).await? {
            return Err(WorkspaceError::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&path).await?;
        tracing::info!(project = name, path = %path.display(), "Project created");
        Ok(path)
    }

    /// Key of an existing project.
    pub async fn project_key(&self, name: &str) -> Result<String, WorkspaceError> {
        validate_project_name(name)?;
        let path = self.root.join(name);
        if !fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(WorkspaceError::NotFound(name.to_string()));
        }
        Ok(key_for(&path))
    }

    /// Human name for a key: the project name, or "Root" for the root.
    pub fn display_name(&self, key: &str) -> String {
        let path = Path::new(key);
        if path == self.root {
            return "Root".to_string();
        }
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Root".to_string())
    }
}

/// Scheduler key for a directory.
pub fn key_for(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_workspace() -> (Workspace, TempDir) {
        let dir = TempDir::new().unwrap();
        (Workspace::new(dir.path()), dir)
    }

    #[test]
    fn project_name_validation() {
        assert!(validate_project_name("web-app_2").is_ok());
        for bad in ["", "a b", "../up", "x/y", "naïve", ".hidden"] {
            assert!(
                matches!(validate_project_name(bad), Err(WorkspaceError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn list_projects_only_directories_sorted() {
        let (ws, dir) = test_workspace();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(ws.list_projects().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn list_projects_missing_root_is_empty() {
        let ws = Workspace::new("/nonexistent/relay/workspace");
        assert!(ws.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_root_creates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("nested/root"));
        ws.ensure_root().await.unwrap();
        assert!(ws.root().is_dir());
        assert!(ws.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_project_then_duplicate() {
        let (ws, dir) = test_workspace();
        let path = ws.create_project("demo").await.unwrap();
        assert_eq!(path, dir.path().join("demo"));
        assert!(path.is_dir());

        let err = ws.create_project("demo").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyExists(name) if name == "demo"));
    }

    #[tokio::test]
    async fn create_project_rejects_bad_name() {
        let (ws, dir) = test_workspace();
        assert!(ws.create_project("../escape").await.is_err());
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[tokio::test]
    async fn project_key_requires_existing_dir() {
        let (ws, dir) = test_workspace();
        std::fs::create_dir(dir.path().join("api")).unwrap();

        let key = ws.project_key("api").await.unwrap();
        assert_eq!(key, key_for(&dir.path().join("api")));
        assert!(matches!(
            ws.project_key("missing").await,
            Err(WorkspaceError::NotFound(_))
        ));
    }

    #[test]
    fn display_names() {
        let ws = Workspace::new("/workspace");
        assert_eq!(ws.display_name(&ws.root_key()), "Root");
        assert_eq!(ws.display_name("/workspace/api"), "api");
    }
}
