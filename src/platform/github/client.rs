use async_trait::async_trait;
use octocrab::Octocrab;

use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{parse_repo, Platform};

use super::mapper;

pub struct GitHubPlatform {
    client: Octocrab,
}

impl GitHubPlatform {
    pub fn new(token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }

    #[cfg(test)]
    fn with_base_uri(token: &str, base_uri: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .base_uri(base_uri)
            .map_err(|e| AppError::GitHubApi(format!("Invalid base URI {base_uri}: {e}")))?
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }

    fn split(repo_full_name: &str) -> Result<(&str, &str)> {
        parse_repo(repo_full_name)
            .ok_or_else(|| AppError::GitHubApi(format!("Invalid repo name: {repo_full_name}")))
    }
}

/// Whether `err` is a GitHub response with the given HTTP status.
fn has_status(err: &octocrab::Error, status: u16) -> bool {
    matches!(err, octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == status)
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn get_repository(&self, repo_full_name: &str) -> Result<RepoInfo> {
        let (owner, repo) = Self::split(repo_full_name)?;
        let repository = self.client.repos(owner, repo).get().await?;
        Ok(mapper::map_repository(repo_full_name, repository))
    }

    async fn get_issue(&self, repo_full_name: &str, issue_number: u64) -> Result<Issue> {
        let (owner, repo) = Self::split(repo_full_name)?;

        let issue = self.client.issues(owner, repo).get(issue_number).await?;

        let comments_page = self
            .client
            .issues(owner, repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;

        Ok(mapper::map_issue(&issue, comments_page.items))
    }

    async fn branch_exists(&self, repo_full_name: &str, branch: &str) -> Result<bool> {
        let (owner, repo) = Self::split(repo_full_name)?;
        let url = format!(
            "/repos/{owner}/{repo}/branches/{}",
            urlencoding::encode(branch)
        );

        match self
            .client
            .get::<serde_json::Value, _, _>(&url, None::<&()>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if has_status(&e, 404) => Ok(false),
            Err(e) => Err(AppError::GitHubApi(format!(
                "Failed to look up branch {branch}: {e}"
            ))),
        }
    }

    async fn list_labels(&self, repo_full_name: &str) -> Result<Vec<String>> {
        let (owner, repo) = Self::split(repo_full_name)?;

        let first_page = self
            .client
            .issues(owner, repo)
            .list_labels_for_repo()
            .per_page(100)
            .send()
            .await?;
        let labels = self.client.all_pages(first_page).await?;

        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn create_label(&self, repo_full_name: &str, label: &NewLabel) -> Result<()> {
        let (owner, repo) = Self::split(repo_full_name)?;

        match self
            .client
            .issues(owner, repo)
            .create_label(&label.name, &label.color, &label.description)
            .await
        {
            Ok(_) => Ok(()),
            // 422: already exists
            Err(e) if has_status(&e, 422) => {
                tracing::debug!(label = %label.name, "Label already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_issue(&self, repo_full_name: &str, issue: &NewIssue) -> Result<CreatedIssue> {
        let (owner, repo) = Self::split(repo_full_name)?;

        let created = self
            .client
            .issues(owner, repo)
            .create(&issue.title)
            .body(&issue.body)
            .labels(issue.labels.clone())
            .send()
            .await?;

        Ok(mapper::map_created_issue(created))
    }

    async fn find_open_pull_request(
        &self,
        repo_full_name: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>> {
        let (owner, repo) = Self::split(repo_full_name)?;

        let page = self
            .client
            .pulls(owner, repo)
            .list()
            .state(octocrab::params::State::Open)
            .head(format!("{owner}:{head_branch}"))
            .per_page(5)
            .send()
            .await?;

        Ok(page.items.into_iter().next().map(mapper::map_pull_request))
    }

    async fn create_pull_request(
        &self,
        repo_full_name: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let (owner, repo) = Self::split(repo_full_name)?;

        let created = self
            .client
            .pulls(owner, repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        Ok(mapper::map_pull_request(created))
    }

    async fn post_comment(
        &self,
        repo_full_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        let (owner, repo) = Self::split(repo_full_name)?;

        self.client
            .issues(owner, repo)
            .create_comment(issue_number, body)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Answer one request per canned `(status, json body)`, in order.
    async fn stub_github(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
        }
    }

    fn label() -> NewLabel {
        NewLabel {
            name: "hyphae-suggested".to_string(),
            color: "c5def5".to_string(),
            description: "Suggested by Hyphae".to_string(),
        }
    }

    #[tokio::test]
    async fn test_existing_label_is_not_an_error() {
        let base = stub_github(vec![(
            422,
            r#"{"message": "Validation Failed", "errors": [{"resource": "Label", "code": "already_exists", "field": "name"}]}"#,
        )])
        .await;
        let platform = GitHubPlatform::with_base_uri("token", &base).unwrap();

        platform.create_label("octo/widgets", &label()).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_label_failures_are_errors() {
        let base = stub_github(vec![(403, r#"{"message": "Resource not accessible"}"#)]).await;
        let platform = GitHubPlatform::with_base_uri("token", &base).unwrap();

        let err = platform.create_label("octo/widgets", &label()).await.unwrap_err();
        assert!(matches!(err, AppError::GitHubApi(_)), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_missing_branch_is_false() {
        let base = stub_github(vec![(404, r#"{"message": "Branch not found"}"#)]).await;
        let platform = GitHubPlatform::with_base_uri("token", &base).unwrap();

        assert!(!platform
            .branch_exists("octo/widgets", "hyphae/issue-12")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_repo_name_is_rejected_before_any_request() {
        let platform = GitHubPlatform::new("token").unwrap();

        let err = platform.list_labels("not-a-repo").await.unwrap_err();
        assert!(err.to_string().contains("Invalid repo name"));
    }
}
