use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Which fixed step table a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowMode {
    /// Analyze, implement, test and review a fix for one issue.
    Resolve,
    /// Propose and file follow-up issues.
    Suggest,
    /// Produce a multi-perspective report on the repository.
    Review,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowMode::Resolve => "resolve",
            WorkflowMode::Suggest => "suggest",
            WorkflowMode::Review => "review",
        }
    }

    /// Working branch used when none is given explicitly.
    pub fn default_branch_name(&self, issue: Option<u64>) -> String {
        match (self, issue) {
            (WorkflowMode::Resolve, Some(n)) => format!("fix/issue-{n}"),
            (WorkflowMode::Resolve, None) => "fix/hyphae".to_string(),
            (WorkflowMode::Suggest, Some(n)) => format!("suggest/issue-{n}"),
            (WorkflowMode::Suggest, None) => "suggest/improvements".to_string(),
            (WorkflowMode::Review, _) => "review-report".to_string(),
        }
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resolve" => Ok(WorkflowMode::Resolve),
            "suggest" => Ok(WorkflowMode::Suggest),
            "review" => Ok(WorkflowMode::Review),
            other => Err(AppError::Config(format!(
                "Invalid workflow mode '{other}': expected one of resolve, suggest, review"
            ))),
        }
    }
}

/// What the caller asked for.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo_full_name: String,
    pub issue: Option<u64>,
    pub mode: WorkflowMode,
    pub branch: String,
}

/// Budgets and switches that shape a run.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub max_test_cycles: u32,
    pub max_review_cycles: u32,
    pub max_phase_attempts: u32,
    pub phase_retry_delay: Duration,
    pub suggested_issues_count: Option<String>,
    pub suggestion_label: String,
    pub dry_run: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_test_cycles: 5,
            max_review_cycles: 2,
            max_phase_attempts: 3,
            phase_retry_delay: Duration::from_secs(10),
            suggested_issues_count: None,
            suggestion_label: "ai-suggested".to_string(),
            dry_run: false,
        }
    }
}

/// Mutable record of one run, threaded through the dispatcher into the finalizer.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub repo_full_name: String,
    pub issue: Option<u64>,
    pub issue_title: Option<String>,
    pub mode: WorkflowMode,
    pub branch: String,
    pub resuming: bool,
    /// Empty until the checkout is prepared.
    pub default_branch: String,
    pub tests_passed: bool,
    pub review_passed: bool,
}

impl WorkflowRun {
    pub fn new(request: RunRequest) -> Self {
        Self {
            repo_full_name: request.repo_full_name,
            issue: request.issue,
            issue_title: None,
            mode: request.mode,
            branch: request.branch,
            resuming: false,
            default_branch: String::new(),
            tests_passed: false,
            review_passed: false,
        }
    }
}

/// Terminal classification of a run. Exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The run completed but the work is incomplete.
    Partial(String),
    /// The run itself failed.
    Error(String),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success | Outcome::Partial(_) => 0,
            Outcome::Error(_) => 1,
        }
    }
}

/// Last `max_chars` characters of `text`, marked when something was cut.
pub fn tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().skip(total - max_chars).collect();
    format!("[... {} characters truncated ...]\n{kept}", total - max_chars)
}
