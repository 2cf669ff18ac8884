use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::platform::types::{CreatePullRequest, Issue, NewIssue, NewLabel};
use crate::platform::Platform;
use crate::workspace::{git, Workspace, WorkspaceManager};

/// Result of preparing the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub branch: String,
    /// Work from an earlier run (local checkout or remote branch) was found.
    pub resuming: bool,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    /// An open pull request for the branch already existed.
    pub reused: bool,
}

/// The repository host as the orchestrator sees it: one repository, its
/// checkout and the remote operations a run needs.
#[async_trait]
pub trait Host: Send + Sync {
    async fn fetch_issue(&self, number: u64) -> Result<Issue>;

    async fn clone_or_continue(&self, branch: &str) -> Result<Checkout>;

    /// Commit all working-tree changes. `false` when there was nothing to commit.
    async fn commit(&self, message: &str, body: &str) -> Result<bool>;

    async fn push(&self, branch: &str) -> Result<()>;

    /// Commits on the working branch that are not on `base`.
    async fn commits_ahead(&self, base: &str) -> Result<usize>;

    async fn create_or_reuse_pr(&self, pr: &CreatePullRequest) -> Result<PullRequestRef>;

    async fn post_comment(&self, issue: u64, body: &str) -> Result<()>;

    async fn list_labels(&self) -> Result<Vec<String>>;

    /// Create `label` unless it already exists.
    async fn ensure_label(&self, label: &NewLabel) -> Result<()>;

    /// Open an issue and return its URL.
    async fn create_issue(&self, issue: &NewIssue) -> Result<String>;
}

/// [`Host`] backed by the GitHub API and a local git2 checkout.
pub struct GitHubHost<P: Platform> {
    platform: P,
    workspaces: WorkspaceManager,
    repo_full_name: String,
    token: String,
    workspace: Mutex<Option<Workspace>>,
}

impl<P: Platform> GitHubHost<P> {
    pub fn new(
        platform: P,
        workspaces: WorkspaceManager,
        repo_full_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            workspaces,
            repo_full_name: repo_full_name.into(),
            token: token.into(),
            workspace: Mutex::new(None),
        }
    }

    fn workspace(&self) -> Result<Workspace> {
        self.workspace
            .lock()
            .map_err(|_| AppError::Internal("Workspace lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| AppError::Workspace("Checkout has not been prepared".to_string()))
    }
}

#[async_trait]
impl<P: Platform> Host for GitHubHost<P> {
    async fn fetch_issue(&self, number: u64) -> Result<Issue> {
        self.platform.get_issue(&self.repo_full_name, number).await
    }

    async fn clone_or_continue(&self, branch: &str) -> Result<Checkout> {
        let repo = self.platform.get_repository(&self.repo_full_name).await?;
        let remote_exists = self
            .platform
            .branch_exists(&self.repo_full_name, branch)
            .await?;

        let workspace = self
            .workspaces
            .clone_or_continue(
                &repo.clone_url,
                &self.token,
                &self.repo_full_name,
                branch,
                remote_exists,
            )
            .await?;

        let checkout = Checkout {
            branch: workspace.branch.clone(),
            resuming: workspace.reused || remote_exists,
            default_branch: repo.default_branch,
        };

        *self
            .workspace
            .lock()
            .map_err(|_| AppError::Internal("Workspace lock poisoned".to_string()))? =
            Some(workspace);

        Ok(checkout)
    }

    async fn commit(&self, message: &str, body: &str) -> Result<bool> {
        let workspace = self.workspace()?;
        let full_message = if body.is_empty() {
            message.to_string()
        } else {
            format!("{message}\n\n{body}")
        };
        git::commit_all(&workspace.path, &full_message).await
    }

    async fn push(&self, branch: &str) -> Result<()> {
        let workspace = self.workspace()?;
        git::push(&workspace.path, branch, &self.token).await
    }

    async fn commits_ahead(&self, base: &str) -> Result<usize> {
        let workspace = self.workspace()?;
        git::commits_ahead(&workspace.path, base).await
    }

    async fn create_or_reuse_pr(&self, pr: &CreatePullRequest) -> Result<PullRequestRef> {
        if let Some(existing) = self
            .platform
            .find_open_pull_request(&self.repo_full_name, &pr.head_branch)
            .await?
        {
            tracing::info!(pr = existing.number, "Reusing open pull request");
            return Ok(PullRequestRef {
                number: existing.number,
                url: existing.url,
                reused: true,
            });
        }

        let created = self
            .platform
            .create_pull_request(&self.repo_full_name, pr)
            .await?;
        Ok(PullRequestRef {
            number: created.number,
            url: created.url,
            reused: false,
        })
    }

    async fn post_comment(&self, issue: u64, body: &str) -> Result<()> {
        self.platform
            .post_comment(&self.repo_full_name, issue, body)
            .await
    }

    async fn list_labels(&self) -> Result<Vec<String>> {
        self.platform.list_labels(&self.repo_full_name).await
    }

    async fn ensure_label(&self, label: &NewLabel) -> Result<()> {
        self.platform.create_label(&self.repo_full_name, label).await
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<String> {
        let created = self
            .platform
            .create_issue(&self.repo_full_name, issue)
            .await?;
        Ok(created.url)
    }
}
