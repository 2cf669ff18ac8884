use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::agent::prompt::PromptContext;
use crate::agent::Agent;
use crate::error::{AppError, Result};
use crate::host::{Checkout, Host, PullRequestRef};
use crate::platform::types::{Comment, CreatePullRequest, Issue, NewIssue, NewLabel};
use crate::retry::RetryPolicy;
use crate::state::StateStore;
use crate::test_runner::{TestReport, TestRunner};
use crate::workflow::dispatch::Orchestrator;
use crate::workflow::phase::{Phase, PhaseRunner};
use crate::workflow::session::Session;
use crate::workflow::types::{RunRequest, WorkflowMode, WorkflowSettings};

pub const REPO: &str = "octo/widgets";

/// Body shared by every test template. The first line names the phase so the
/// fake agent can tell invocations apart.
const TEMPLATE_BODY: &str = "Repository: {{repo}}\n\
{{issue_context}}\n\
Test output:\n{{last_test_output}}\n\
Review feedback:\n{{last_review_feedback}}\n";

pub fn request(mode: WorkflowMode, issue: Option<u64>) -> RunRequest {
    RunRequest {
        repo_full_name: REPO.to_string(),
        issue,
        mode,
        branch: mode.default_branch_name(issue),
    }
}

pub fn write_template(dir: &Path, phase: &str) {
    std::fs::write(
        dir.join(format!("{phase}.md")),
        format!("PHASE:{phase}\n{TEMPLATE_BODY}"),
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub enum Reaction {
    Succeed,
    Fail,
    /// Write `(key, value)` files into the state directory, then succeed.
    Write(Vec<(String, String)>),
}

impl Reaction {
    pub fn write(key: &str, value: &str) -> Self {
        Reaction::Write(vec![(key.to_string(), value.to_string())])
    }
}

/// Agent that reacts to each phase as scripted and records every prompt.
pub struct FakeAgent {
    state_dir: PathBuf,
    scripted: Mutex<HashMap<String, VecDeque<Reaction>>>,
    fallback: Mutex<HashMap<String, Reaction>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeAgent {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            scripted: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue reactions for the next invocations of `phase`.
    pub fn script(&self, phase: &str, reactions: Vec<Reaction>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(phase.to_string())
            .or_default()
            .extend(reactions);
    }

    /// Reaction once the script for `phase` is used up.
    pub fn always(&self, phase: &str, reaction: Reaction) {
        self.fallback
            .lock()
            .unwrap()
            .insert(phase.to_string(), reaction);
    }

    /// Phase names in invocation order, retries included.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(phase, _)| phase.clone())
            .collect()
    }

    pub fn calls_for(&self, phase: &str) -> usize {
        self.prompts_for(phase).len()
    }

    pub fn prompts_for(&self, phase: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == phase)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn next_reaction(&self, phase: &str) -> Reaction {
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(phase)
            .and_then(|queue| queue.pop_front());
        scripted
            .or_else(|| self.fallback.lock().unwrap().get(phase).cloned())
            .unwrap_or(Reaction::Succeed)
    }
}

#[async_trait]
impl Agent for FakeAgent {
    async fn invoke(&self, prompt: &str) -> Result<()> {
        let phase = prompt
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("PHASE:"))
            .unwrap_or_default()
            .trim()
            .to_string();
        self.calls
            .lock()
            .unwrap()
            .push((phase.clone(), prompt.to_string()));

        match self.next_reaction(&phase) {
            Reaction::Succeed => Ok(()),
            Reaction::Fail => Err(AppError::Agent(format!("scripted failure in {phase}"))),
            Reaction::Write(files) => {
                for (key, value) in files {
                    std::fs::write(self.state_dir.join(key), value)?;
                }
                Ok(())
            }
        }
    }
}

/// Test runner returning scripted reports, then a fallback (passing by default).
/// A scripted `None` makes the run itself fail.
pub struct FakeTestRunner {
    scripted: Mutex<VecDeque<Option<TestReport>>>,
    fallback: Mutex<TestReport>,
    runs: AtomicU32,
}

impl FakeTestRunner {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(TestReport::passed("all tests passed")),
            runs: AtomicU32::new(0),
        }
    }

    pub fn script(&self, reports: Vec<Option<TestReport>>) {
        self.scripted.lock().unwrap().extend(reports);
    }

    pub fn always(&self, report: TestReport) {
        *self.fallback.lock().unwrap() = report;
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestRunner for FakeTestRunner {
    async fn run_tests(&self) -> Result<TestReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let next = self.scripted.lock().unwrap().pop_front();
        match next {
            Some(Some(report)) => Ok(report),
            Some(None) => Err(AppError::TestRunner("runner unavailable".to_string())),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostBehavior {
    pub issue: Issue,
    pub resuming: bool,
    pub default_branch: String,
    pub labels: Vec<String>,
    pub has_changes: bool,
    pub commits_ahead: usize,
    pub existing_pr: bool,
    pub fail_clone: bool,
    /// Commit, push, pull request and comment calls fail.
    pub fail_writes: bool,
    pub fail_issue_titles: Vec<String>,
    /// Fetching the issue panics instead of returning.
    pub panic_on_fetch: bool,
}

impl Default for HostBehavior {
    fn default() -> Self {
        Self {
            issue: Issue {
                number: 12,
                title: "Login fails".to_string(),
                body: "Steps to reproduce".to_string(),
                labels: vec!["bug".to_string()],
                comments: vec![Comment {
                    id: 1,
                    author: "alice".to_string(),
                    body: "Same here".to_string(),
                }],
            },
            resuming: false,
            default_branch: "main".to_string(),
            labels: Vec::new(),
            has_changes: true,
            commits_ahead: 0,
            existing_pr: false,
            fail_clone: false,
            fail_writes: false,
            fail_issue_titles: Vec::new(),
            panic_on_fetch: false,
        }
    }
}

/// Everything the orchestrator asked the host to change.
#[derive(Debug, Clone, Default)]
pub struct HostLog {
    pub commits: Vec<String>,
    pub pushes: Vec<String>,
    pub pull_requests: Vec<CreatePullRequest>,
    pub comments: Vec<(u64, String)>,
    pub labels_ensured: Vec<String>,
    pub issues: Vec<NewIssue>,
}

pub struct FakeHost {
    behavior: Mutex<HostBehavior>,
    log: Mutex<HostLog>,
}

impl FakeHost {
    pub const PR_URL: &'static str = "https://github.com/octo/widgets/pull/77";
    pub const ISSUE_URL_PREFIX: &'static str = "https://github.com/octo/widgets/issues/";

    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(HostBehavior::default()),
            log: Mutex::new(HostLog::default()),
        }
    }

    pub fn configure(&self, change: impl FnOnce(&mut HostBehavior)) {
        change(&mut self.behavior.lock().unwrap());
    }

    pub fn log(&self) -> HostLog {
        self.log.lock().unwrap().clone()
    }

    fn behavior(&self) -> HostBehavior {
        self.behavior.lock().unwrap().clone()
    }

    fn check_writes(&self) -> Result<()> {
        if self.behavior().fail_writes {
            return Err(AppError::GitHubApi("scripted host failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn fetch_issue(&self, number: u64) -> Result<Issue> {
        let behavior = self.behavior();
        if behavior.panic_on_fetch {
            panic!("scripted panic while fetching issue #{number}");
        }
        let mut issue = behavior.issue;
        issue.number = number;
        Ok(issue)
    }

    async fn clone_or_continue(&self, branch: &str) -> Result<Checkout> {
        let behavior = self.behavior();
        if behavior.fail_clone {
            return Err(AppError::Git("scripted clone failure".to_string()));
        }
        Ok(Checkout {
            branch: branch.to_string(),
            resuming: behavior.resuming,
            default_branch: behavior.default_branch,
        })
    }

    async fn commit(&self, message: &str, _body: &str) -> Result<bool> {
        self.check_writes()?;
        if !self.behavior().has_changes {
            return Ok(false);
        }
        self.log.lock().unwrap().commits.push(message.to_string());
        Ok(true)
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.check_writes()?;
        self.log.lock().unwrap().pushes.push(branch.to_string());
        Ok(())
    }

    async fn commits_ahead(&self, _base: &str) -> Result<usize> {
        Ok(self.behavior().commits_ahead)
    }

    async fn create_or_reuse_pr(&self, pr: &CreatePullRequest) -> Result<PullRequestRef> {
        self.check_writes()?;
        let reused = self.behavior().existing_pr;
        if !reused {
            self.log.lock().unwrap().pull_requests.push(pr.clone());
        }
        Ok(PullRequestRef {
            number: 77,
            url: Self::PR_URL.to_string(),
            reused,
        })
    }

    async fn post_comment(&self, issue: u64, body: &str) -> Result<()> {
        self.check_writes()?;
        self.log
            .lock()
            .unwrap()
            .comments
            .push((issue, body.to_string()));
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<String>> {
        Ok(self.behavior().labels)
    }

    async fn ensure_label(&self, label: &NewLabel) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .labels_ensured
            .push(label.name.clone());
        Ok(())
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<String> {
        if self.behavior().fail_issue_titles.contains(&issue.title) {
            return Err(AppError::GitHubApi("scripted issue failure".to_string()));
        }
        let mut log = self.log.lock().unwrap();
        log.issues.push(issue.clone());
        Ok(format!("{}{}", Self::ISSUE_URL_PREFIX, 100 + log.issues.len()))
    }
}

/// Orchestrator wiring over fakes and temporary directories.
pub struct Harness {
    _prompts: TempDir,
    _state: TempDir,
    pub prompts_dir: PathBuf,
    pub store: StateStore,
    pub agent: Arc<FakeAgent>,
    pub tests: Arc<FakeTestRunner>,
    pub host: Arc<FakeHost>,
    pub settings: WorkflowSettings,
}

impl Harness {
    /// A template for every phase, no retry delay, default budgets.
    pub async fn new() -> Self {
        let prompts = tempfile::tempdir().unwrap();
        for phase in Phase::all() {
            write_template(prompts.path(), phase.name());
        }
        let state = tempfile::tempdir().unwrap();
        let store = StateStore::open(state.path()).await.unwrap();

        Self {
            prompts_dir: prompts.path().to_path_buf(),
            agent: Arc::new(FakeAgent::new(state.path())),
            tests: Arc::new(FakeTestRunner::new()),
            host: Arc::new(FakeHost::new()),
            settings: WorkflowSettings {
                phase_retry_delay: Duration::ZERO,
                ..WorkflowSettings::default()
            },
            store,
            _prompts: prompts,
            _state: state,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.agent.clone(),
            self.tests.clone(),
            self.host.clone(),
            self.store.clone(),
            self.prompts_dir.clone(),
            self.settings.clone(),
        )
    }

    pub fn phase_runner(&self) -> PhaseRunner {
        PhaseRunner::new(
            self.agent.clone(),
            self.store.clone(),
            self.prompts_dir.clone(),
            RetryPolicy::new(self.settings.max_phase_attempts, Duration::ZERO),
            PromptContext {
                repo: REPO.to_string(),
                ..PromptContext::default()
            },
        )
    }

    pub fn session(&self, issue: Option<u64>) -> Session {
        Session {
            settings: self.settings.clone(),
            phases: self.phase_runner(),
            store: self.store.clone(),
            tests: self.tests.clone(),
            host: self.host.clone(),
            repo_full_name: REPO.to_string(),
            issue,
        }
    }
}
