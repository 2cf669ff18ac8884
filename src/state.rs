use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::workflow::types::WorkflowMode;

/// Keys with a fixed meaning.
pub mod keys {
    pub const LAST_TEST_OUTPUT: &str = "last_test_output";
    pub const LAST_REVIEW_FEEDBACK: &str = "last_review_feedback";
    pub const SUGGESTED_ISSUE_URLS: &str = "suggested_issue_urls";
    pub const PROMPT_FINGERPRINT: &str = "prompt_fingerprint";

    // Written by the agent.
    pub const SUGGESTED_ISSUES: &str = "suggested_issues.json";
    pub const REFINED_ISSUE: &str = "refined_issue.json";
    pub const REVIEW_PASSED: &str = "review_passed";
    pub const REVIEW_FEEDBACK: &str = "review_feedback";

    // Written by the orchestrator for the agent.
    pub const CURRENT_SUGGESTION: &str = "current_suggestion.json";

    pub fn prompt(phase: &str) -> String {
        format!("prompt_{phase}.md")
    }

    pub fn review_report(category: &str) -> String {
        format!("{category}_review_report")
    }
}

/// Durable key/text storage shared between phases.
///
/// Every key is a file in a directory scoped to one run (repository, mode and
/// work item). The agent reads and writes the same directory, so phase
/// artifacts come back to the orchestrator through it. A missing key is the
/// caller's default.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// An existing directory is reused untouched so that a resumed run sees the
    /// artifacts of the previous one.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::State(format!("Failed to create state dir {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Directory for a single run of `mode` against `repo_full_name`.
    pub fn run_dir(
        root: &Path,
        repo_full_name: &str,
        mode: WorkflowMode,
        issue: Option<u64>,
    ) -> PathBuf {
        let safe_repo = repo_full_name.replace('/', "__");
        let scope = match issue {
            Some(number) => format!("{mode}-{number}"),
            None => format!("{mode}-repo"),
        };
        root.join(safe_repo).join(scope)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    /// Overwrite `key` with `value`.
    pub async fn save(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key)?;
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| AppError::State(format!("Failed to write {key}: {e}")))
    }

    /// Value of `key`, or `default` when it is absent or unreadable.
    pub async fn load(&self, key: &str, default: &str) -> String {
        let Ok(path) = self.path(key) else {
            return default.to_string();
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => value,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(key, error = %e, "Failed to read state entry");
                }
                default.to_string()
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        match self.path(key) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Delete `key`. Deleting an absent key is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::State(format!("Failed to remove {key}: {e}"))),
        }
    }

    /// Remove several keys, logging (not failing) on errors.
    pub async fn clear(&self, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.remove(key).await {
                tracing::warn!(key, error = %e, "Failed to clear state entry");
            }
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key == "."
        || key == ".."
    {
        return Err(AppError::State(format!("Invalid state key: {key:?}")));
    }
    Ok(())
}
