pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Clone URL and default branch of a repository.
    async fn get_repository(&self, repo_full_name: &str) -> Result<RepoInfo>;

    /// Fetch a full issue with comments.
    async fn get_issue(&self, repo_full_name: &str, issue_number: u64) -> Result<Issue>;

    /// Whether `branch` exists on the remote.
    async fn branch_exists(&self, repo_full_name: &str, branch: &str) -> Result<bool>;

    /// Names of all labels defined on the repository.
    async fn list_labels(&self, repo_full_name: &str) -> Result<Vec<String>>;

    /// Create a label. A label that already exists is not an error.
    async fn create_label(&self, repo_full_name: &str, label: &NewLabel) -> Result<()>;

    /// Open a new issue.
    async fn create_issue(&self, repo_full_name: &str, issue: &NewIssue) -> Result<CreatedIssue>;

    /// The open pull request whose head is `head_branch`, if any.
    async fn find_open_pull_request(
        &self,
        repo_full_name: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>>;

    /// Create a pull request.
    async fn create_pull_request(
        &self,
        repo_full_name: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest>;

    /// Post a comment on an issue or PR.
    async fn post_comment(&self, repo_full_name: &str, issue_number: u64, body: &str)
        -> Result<()>;
}

/// Split `owner/repo`.
pub fn parse_repo(repo_full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = repo_full_name.split_once('/')?;
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    };
    (valid(owner) && valid(repo)).then_some((owner, repo))
}
