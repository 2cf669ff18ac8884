use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::workspace::git;

/// Manages checkout directories for agent operations.
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

/// A checked-out workspace ready for the agent to work in.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    /// The checkout already existed from an earlier run.
    pub reused: bool,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
        }
    }

    /// Remove leftovers that are not a repository and ensure the parent exists.
    async fn prepare_workspace_dir(path: &Path) -> Result<()> {
        if path.exists() {
            tracing::warn!(path = %path.display(), "Removing non-repository workspace leftovers");
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        }
        Ok(())
    }

    /// Clone the repository, or continue in the checkout a previous run left.
    ///
    /// An existing checkout is authoritative: it is never re-cloned, and an
    /// existing local branch is checked out as-is so unpushed work survives.
    /// Otherwise the branch is fetched when it exists remotely, or created.
    pub async fn clone_or_continue(
        &self,
        clone_url: &str,
        token: &str,
        repo_full_name: &str,
        branch: &str,
        remote_branch_exists: bool,
    ) -> Result<Workspace> {
        let path = self.workspace_path(repo_full_name, branch);
        let reused = git::is_repository(&path).await;

        if reused {
            tracing::info!(path = %path.display(), "Reusing existing checkout");
        } else {
            Self::prepare_workspace_dir(&path).await?;
            git::clone(clone_url, &path, token).await?;
        }

        if git::local_branch_exists(&path, branch).await? {
            git::checkout(&path, branch).await?;
        } else if remote_branch_exists {
            tracing::info!(branch, "Continuing from existing remote branch");
            git::fetch_and_checkout(&path, branch, token).await?;
        } else {
            git::create_branch(&path, branch).await?;
        }

        Ok(Workspace {
            path,
            branch: branch.to_string(),
            reused,
        })
    }

    pub fn workspace_path(&self, repo_full_name: &str, branch: &str) -> PathBuf {
        let safe_name = repo_full_name.replace('/', "__");
        let safe_branch = branch.replace('/', "__");
        self.base_dir.join(format!("{safe_name}__{safe_branch}"))
    }
}
