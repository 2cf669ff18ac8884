use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;

use crate::agent::prompt::{self, PromptContext};
use crate::agent::Agent;
use crate::error::{AppError, Result};
use crate::host::Host;
use crate::retry::RetryPolicy;
use crate::state::{keys, StateStore};
use crate::test_runner::TestRunner;
use crate::workflow::finalize::Finalizer;
use crate::workflow::phase::{Phase, PhasePolicy, PhaseRunner, ReportCategory};
use crate::workflow::session::Session;
use crate::workflow::suggest::resolve_target_count;
use crate::workflow::types::{tail, Outcome, RunRequest, WorkflowMode, WorkflowRun, WorkflowSettings};

/// Test output kept in a partial outcome's reason.
const TEST_OUTPUT_TAIL_CHARS: usize = 2000;

/// One entry of a workflow's step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Phase(Phase, PhasePolicy),
    Implement(PhasePolicy),
    TestCycle,
    ReviewCycle,
    Suggestions,
    Summary,
    ClearReviewState,
    Aggregate(PhasePolicy),
}

/// The fixed step table of `mode`.
pub fn steps(mode: WorkflowMode) -> Vec<Step> {
    let setup = Step::Phase(Phase::Setup, PhasePolicy::BestEffort);
    match mode {
        WorkflowMode::Resolve => vec![
            setup,
            Step::Phase(Phase::Analyze, PhasePolicy::HardFail),
            Step::Implement(PhasePolicy::HardFail),
            Step::TestCycle,
            Step::ReviewCycle,
            Step::Suggestions,
        ],
        WorkflowMode::Suggest => vec![setup, Step::Suggestions, Step::Summary],
        WorkflowMode::Review => {
            let mut steps = vec![setup];
            steps.extend(
                ReportCategory::ALL
                    .into_iter()
                    .map(|category| Step::Phase(Phase::Report(category), PhasePolicy::HardFail)),
            );
            steps.push(Step::ClearReviewState);
            steps.push(Step::Aggregate(PhasePolicy::HardFail));
            steps
        }
    }
}

/// Runs one workflow from preparation to finalization.
pub struct Orchestrator {
    agent: Arc<dyn Agent>,
    tests: Arc<dyn TestRunner>,
    host: Arc<dyn Host>,
    store: StateStore,
    prompts_dir: PathBuf,
    settings: WorkflowSettings,
}

impl Orchestrator {
    pub fn new(
        agent: Arc<dyn Agent>,
        tests: Arc<dyn TestRunner>,
        host: Arc<dyn Host>,
        store: StateStore,
        prompts_dir: impl Into<PathBuf>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            agent,
            tests,
            host,
            store,
            prompts_dir: prompts_dir.into(),
            settings,
        }
    }

    /// Execute the run and its finalization. Always yields exactly one outcome.
    pub async fn run(&self, request: RunRequest) -> Outcome {
        let mut run = WorkflowRun::new(request);
        tracing::info!(
            repo = %run.repo_full_name,
            issue = ?run.issue,
            mode = %run.mode,
            branch = %run.branch,
            dry_run = self.settings.dry_run,
            "Starting workflow"
        );

        let outcome = match AssertUnwindSafe(self.execute(&mut run)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Outcome::Error(e.to_string()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "Workflow panicked");
                Outcome::Error(format!("Internal error: {message}"))
            }
        };

        Finalizer::new(self.host.as_ref(), &self.store, self.settings.dry_run)
            .finalize(&run, &outcome)
            .await;

        outcome
    }

    async fn execute(&self, run: &mut WorkflowRun) -> Result<Outcome> {
        let context = self.prepare(run).await?;
        let session = self.session(run, context);

        for step in steps(run.mode) {
            if let Some(outcome) = self.run_step(&session, run, step).await? {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Success)
    }

    /// Fetch the issue and get the checkout ready.
    async fn prepare(&self, run: &mut WorkflowRun) -> Result<PromptContext> {
        let mut context = PromptContext {
            repo: run.repo_full_name.clone(),
            issue_number: run.issue,
            ..PromptContext::default()
        };

        if let Some(number) = run.issue {
            let issue = self.host.fetch_issue(number).await?;
            context.issue_context = prompt::issue_context(&issue);
            run.issue_title = Some(issue.title);
        }

        let checkout = self.host.clone_or_continue(&run.branch).await?;
        run.branch = checkout.branch;
        run.resuming = checkout.resuming;
        run.default_branch = checkout.default_branch;
        if run.resuming {
            tracing::info!(branch = %run.branch, "Resuming work from a previous run");
        }

        self.check_prompt_fingerprint(run.resuming).await;
        Ok(context)
    }

    /// Remember which prompt set this run uses, and warn when a resumed run
    /// continues with different prompts.
    async fn check_prompt_fingerprint(&self, resuming: bool) {
        let current = match prompt::fingerprint(&self.prompts_dir).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fingerprint prompts");
                return;
            }
        };

        let previous = self.store.load(keys::PROMPT_FINGERPRINT, "").await;
        if resuming && !previous.is_empty() && previous != current {
            tracing::warn!("Prompts changed since the previous run of this work item");
        }
        if let Err(e) = self.store.save(keys::PROMPT_FINGERPRINT, &current).await {
            tracing::warn!(error = %e, "Failed to store prompt fingerprint");
        }
    }

    fn session(&self, run: &WorkflowRun, mut context: PromptContext) -> Session {
        context.suggested_issues_count = resolve_target_count(
            self.settings.suggested_issues_count.as_deref(),
            run.mode,
        );
        let retry = RetryPolicy::new(
            self.settings.max_phase_attempts,
            self.settings.phase_retry_delay,
        );

        Session {
            settings: self.settings.clone(),
            phases: PhaseRunner::new(
                Arc::clone(&self.agent),
                self.store.clone(),
                self.prompts_dir.clone(),
                retry,
                context,
            ),
            store: self.store.clone(),
            tests: Arc::clone(&self.tests),
            host: Arc::clone(&self.host),
            repo_full_name: run.repo_full_name.clone(),
            issue: run.issue,
        }
    }

    /// Run one step. `Some` ends the run early with that outcome.
    async fn run_step(
        &self,
        session: &Session,
        run: &mut WorkflowRun,
        step: Step,
    ) -> Result<Option<Outcome>> {
        match step {
            Step::Phase(phase, policy) => {
                let ok = session.phases.run(phase, None).await;
                check_policy(phase, policy, ok)?;
            }
            Step::Implement(policy) => {
                let ok = session.implement(1).await;
                check_policy(Phase::Implement, policy, ok)?;
            }
            Step::TestCycle => {
                run.tests_passed = session.test_cycle().await;
                if !run.tests_passed {
                    let output = self.store.load(keys::LAST_TEST_OUTPUT, "").await;
                    return Ok(Some(Outcome::Partial(format!(
                        "Tests are still failing after {} cycle(s). Last test output:\n\n{}",
                        self.settings.max_test_cycles,
                        tail(&output, TEST_OUTPUT_TAIL_CHARS)
                    ))));
                }
            }
            Step::ReviewCycle => {
                let review = session.review_cycle().await;
                run.review_passed = review.passed;
                if let Some(tests_passed) = review.retested {
                    run.tests_passed = tests_passed;
                }
                if !run.review_passed {
                    let feedback = self.store.load(keys::LAST_REVIEW_FEEDBACK, "").await;
                    return Ok(Some(Outcome::Partial(format!(
                        "Review did not pass after {} cycle(s). Last review feedback:\n\n{}",
                        self.settings.max_review_cycles,
                        feedback.trim()
                    ))));
                }
            }
            Step::Suggestions => {
                match resolve_target_count(self.settings.suggested_issues_count.as_deref(), run.mode)
                {
                    Some(target) => {
                        session.suggestion_loop(target).await;
                    }
                    None => tracing::debug!("Suggestions disabled for this run"),
                }
            }
            Step::Summary => {
                let urls = self.store.load(keys::SUGGESTED_ISSUE_URLS, "").await;
                let extra = if urls.trim().is_empty() {
                    "No issues were created.".to_string()
                } else {
                    format!("Created issues:\n{urls}")
                };
                if !session.phases.run(Phase::Summary, Some(&extra)).await {
                    tracing::warn!("Summary phase failed");
                }
            }
            Step::ClearReviewState => {
                self.store
                    .clear(&[
                        keys::REVIEW_PASSED,
                        keys::REVIEW_FEEDBACK,
                        keys::LAST_REVIEW_FEEDBACK,
                        keys::LAST_TEST_OUTPUT,
                    ])
                    .await;
            }
            Step::Aggregate(policy) => {
                let reports = self.collect_reports().await;
                let ok = session
                    .phases
                    .run(Phase::AggregateReport, Some(&reports))
                    .await;
                check_policy(Phase::AggregateReport, policy, ok)?;
            }
        }
        Ok(None)
    }

    async fn collect_reports(&self) -> String {
        let mut sections = Vec::with_capacity(ReportCategory::ALL.len());
        for category in ReportCategory::ALL {
            let report = self.store.load(&category.state_key(), "").await;
            let report = if report.trim().is_empty() {
                "(no report produced)".to_string()
            } else {
                report.trim().to_string()
            };
            sections.push(format!("## {} report\n\n{report}", category.title()));
        }
        sections.join("\n\n")
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn check_policy(phase: Phase, policy: PhasePolicy, ok: bool) -> Result<()> {
    match (ok, policy) {
        (true, _) => Ok(()),
        (false, PhasePolicy::BestEffort) => {
            tracing::warn!(phase = %phase, "Optional phase failed, continuing");
            Ok(())
        }
        (false, PhasePolicy::HardFail) => Err(AppError::Agent(format!(
            "Phase '{phase}' failed"
        ))),
    }
}
