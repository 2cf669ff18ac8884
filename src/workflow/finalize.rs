use crate::host::Host;
use crate::platform::types::CreatePullRequest;
use crate::state::{keys, StateStore};
use crate::workflow::types::{Outcome, WorkflowMode, WorkflowRun};

const SIGNATURE: &str = "\n\n---\n*Hyphae*";

/// Side effects of a run's terminal outcome.
///
/// Every outcome first tries to preserve the work on the branch. Host failures
/// are logged and never change the outcome.
pub struct Finalizer<'a> {
    host: &'a dyn Host,
    store: &'a StateStore,
    dry_run: bool,
}

impl<'a> Finalizer<'a> {
    pub fn new(host: &'a dyn Host, store: &'a StateStore, dry_run: bool) -> Self {
        Self {
            host,
            store,
            dry_run,
        }
    }

    pub async fn finalize(&self, run: &WorkflowRun, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.success(run).await,
            Outcome::Partial(reason) => self.partial(run, reason).await,
            Outcome::Error(message) => self.error(run, message).await,
        }
    }

    async fn success(&self, run: &WorkflowRun) {
        tracing::info!(mode = %run.mode, "Run succeeded");
        let committed = self.commit(run, &commit_subject(run), "").await;
        let ahead = self.commits_ahead(run).await;

        let mut pr_url = None;
        if committed || ahead > 0 {
            if self.push(run).await {
                pr_url = self.open_pull_request(run, None).await;
            }
        } else {
            tracing::info!("No changes to publish");
        }

        let mut body = match (run.mode, &pr_url) {
            (WorkflowMode::Review, Some(url)) => format!("The repository review report is ready: {url}"),
            (_, Some(url)) => format!("I've opened a pull request for this issue: {url}"),
            (_, None) => "I finished working on this issue but didn't find any code changes to publish.".to_string(),
        };

        if run.mode == WorkflowMode::Suggest {
            let urls = self.store.load(keys::SUGGESTED_ISSUE_URLS, "").await;
            let urls: Vec<&str> = urls.lines().filter(|l| !l.trim().is_empty()).collect();
            if urls.is_empty() {
                body.push_str("\n\nNo follow-up issues were created.");
            } else {
                body.push_str("\n\n**Suggested issues:**\n");
                body.push_str(
                    &urls
                        .iter()
                        .map(|url| format!("- {url}"))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
        }

        self.comment(run, &body).await;
    }

    async fn partial(&self, run: &WorkflowRun, reason: &str) {
        tracing::warn!(mode = %run.mode, reason, "Run finished partially");
        let committed = self
            .commit(run, &format!("wip: {}", commit_subject(run)), reason)
            .await;
        let ahead = self.commits_ahead(run).await;

        let mut pr_url = None;
        if (committed || ahead > 0) && self.push(run).await && (run.tests_passed || ahead > 0) {
            pr_url = self.open_pull_request(run, Some(reason)).await;
        }

        let mut body = format!(
            "I made progress on this issue but couldn't complete it:\n\n{reason}\n\n\
             - Tests passed: {}\n- Review passed: {}",
            yes_no(run.tests_passed),
            yes_no(run.review_passed),
        );
        if let Some(url) = pr_url {
            body.push_str(&format!("\n\nWork in progress: {url}"));
        }

        self.comment(run, &body).await;
    }

    async fn error(&self, run: &WorkflowRun, message: &str) {
        tracing::error!(mode = %run.mode, error = message, "Run failed");
        let committed = self
            .commit(run, &format!("wip: {}", commit_subject(run)), message)
            .await;
        if committed {
            self.push(run).await;
        }

        self.comment(
            run,
            &format!(
                "I encountered an error while working on this issue:\n\n```\n{message}\n```"
            ),
        )
        .await;
    }

    async fn commit(&self, run: &WorkflowRun, subject: &str, body: &str) -> bool {
        if self.dry_run {
            tracing::info!(subject, "Dry run: skipping commit");
            return false;
        }
        match self.host.commit(subject, body).await {
            Ok(true) => {
                tracing::info!(branch = %run.branch, subject, "Committed changes");
                true
            }
            Ok(false) => {
                tracing::info!("Nothing to commit");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to commit changes");
                false
            }
        }
    }

    async fn commits_ahead(&self, run: &WorkflowRun) -> usize {
        if self.dry_run || run.default_branch.is_empty() {
            return 0;
        }
        match self.host.commits_ahead(&run.default_branch).await {
            Ok(ahead) => ahead,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compare branch with default branch");
                0
            }
        }
    }

    async fn push(&self, run: &WorkflowRun) -> bool {
        if self.dry_run {
            tracing::info!(branch = %run.branch, "Dry run: skipping push");
            return false;
        }
        match self.host.push(&run.branch).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(branch = %run.branch, error = %e, "Failed to push branch");
                false
            }
        }
    }

    async fn open_pull_request(&self, run: &WorkflowRun, partial: Option<&str>) -> Option<String> {
        if run.default_branch.is_empty() {
            return None;
        }
        let pr = pull_request(run, partial);
        match self.host.create_or_reuse_pr(&pr).await {
            Ok(pr) => {
                tracing::info!(pr = pr.number, reused = pr.reused, url = %pr.url, "Pull request ready");
                Some(pr.url)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create pull request");
                None
            }
        }
    }

    async fn comment(&self, run: &WorkflowRun, body: &str) {
        let Some(issue) = run.issue else {
            return;
        };
        if self.dry_run {
            tracing::info!(issue, "Dry run: skipping comment");
            return;
        }
        if let Err(e) = self
            .host
            .post_comment(issue, &format!("{body}{SIGNATURE}"))
            .await
        {
            tracing::warn!(issue, error = %e, "Failed to post comment");
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Commit subject for the run's mode.
pub fn commit_subject(run: &WorkflowRun) -> String {
    match (run.mode, run.issue) {
        (WorkflowMode::Resolve, Some(n)) => format!("fix: resolve #{n}"),
        (WorkflowMode::Resolve, None) => "fix: apply automated changes".to_string(),
        (WorkflowMode::Suggest, Some(n)) => format!("chore: suggest follow-up work for #{n}"),
        (WorkflowMode::Suggest, None) => "chore: suggest follow-up work".to_string(),
        (WorkflowMode::Review, _) => "docs: add repository review report".to_string(),
    }
}

fn pull_request(run: &WorkflowRun, partial: Option<&str>) -> CreatePullRequest {
    let title = match (run.mode, run.issue, &run.issue_title) {
        (WorkflowMode::Resolve, Some(n), Some(title)) => format!("Fix #{n}: {title}"),
        (WorkflowMode::Resolve, Some(n), None) => format!("Fix #{n}"),
        (WorkflowMode::Review, _, _) => "Repository review report".to_string(),
        _ => commit_subject(run),
    };
    let title = match partial {
        Some(_) => format!("[WIP] {title}"),
        None => title,
    };

    let mut body = match run.issue {
        Some(n) if run.mode == WorkflowMode::Resolve && partial.is_none() => format!("Resolves #{n}"),
        Some(n) => format!("Related to #{n}"),
        None => format!("Automated {} run on `{}`", run.mode, run.branch),
    };
    if let Some(reason) = partial {
        body.push_str(&format!("\n\n## Incomplete\n\n{reason}"));
    }
    body.push_str("\n\n---\n*Automated by Hyphae*");

    CreatePullRequest {
        title,
        body,
        head_branch: run.branch.clone(),
        base_branch: run.default_branch.clone(),
    }
}
