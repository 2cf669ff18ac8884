use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::prompt::{self, PromptContext};
use crate::agent::Agent;
use crate::retry::RetryPolicy;
use crate::state::{keys, StateStore};

/// Perspective of one repository review report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportCategory {
    Security,
    Architecture,
    Customer,
    Engineering,
    Testing,
    Resource,
}

impl ReportCategory {
    /// Report order of the review workflow.
    pub const ALL: [ReportCategory; 6] = [
        ReportCategory::Security,
        ReportCategory::Architecture,
        ReportCategory::Customer,
        ReportCategory::Engineering,
        ReportCategory::Testing,
        ReportCategory::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::Security => "security",
            ReportCategory::Architecture => "architecture",
            ReportCategory::Customer => "customer",
            ReportCategory::Engineering => "engineering",
            ReportCategory::Testing => "testing",
            ReportCategory::Resource => "resource",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportCategory::Security => "Security",
            ReportCategory::Architecture => "Architecture",
            ReportCategory::Customer => "Customer",
            ReportCategory::Engineering => "Engineering",
            ReportCategory::Testing => "Testing",
            ReportCategory::Resource => "Resource",
        }
    }

    /// State key the agent writes this report to.
    pub fn state_key(&self) -> String {
        keys::review_report(self.as_str())
    }
}

/// A named request to the agent. The name is also the template file stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Analyze,
    Implement,
    GenerateTests,
    FixTests,
    Review,
    SuggestIssues,
    RefineIssue,
    Summary,
    Report(ReportCategory),
    AggregateReport,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Analyze => "analyze",
            Phase::Implement => "implement",
            Phase::GenerateTests => "generate_tests",
            Phase::FixTests => "fix_tests",
            Phase::Review => "review",
            Phase::SuggestIssues => "suggest_issues",
            Phase::RefineIssue => "refine_issue",
            Phase::Summary => "summary",
            Phase::Report(ReportCategory::Security) => "security_report",
            Phase::Report(ReportCategory::Architecture) => "architecture_report",
            Phase::Report(ReportCategory::Customer) => "customer_report",
            Phase::Report(ReportCategory::Engineering) => "engineering_report",
            Phase::Report(ReportCategory::Testing) => "testing_report",
            Phase::Report(ReportCategory::Resource) => "resource_report",
            Phase::AggregateReport => "aggregate_report",
        }
    }

    pub fn all() -> Vec<Phase> {
        let mut phases = vec![
            Phase::Setup,
            Phase::Analyze,
            Phase::Implement,
            Phase::GenerateTests,
            Phase::FixTests,
            Phase::Review,
            Phase::SuggestIssues,
            Phase::RefineIssue,
            Phase::Summary,
        ];
        phases.extend(ReportCategory::ALL.into_iter().map(Phase::Report));
        phases.push(Phase::AggregateReport);
        phases
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a failed phase means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasePolicy {
    /// Log and keep going.
    BestEffort,
    /// End the run with an error.
    HardFail,
}

/// Renders a phase's template and hands it to the agent, retrying failed
/// invocations. Never returns an error: the caller only learns whether the
/// phase eventually succeeded.
pub struct PhaseRunner {
    agent: Arc<dyn Agent>,
    store: StateStore,
    prompts_dir: PathBuf,
    retry: RetryPolicy,
    context: PromptContext,
}

impl PhaseRunner {
    pub fn new(
        agent: Arc<dyn Agent>,
        store: StateStore,
        prompts_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        context: PromptContext,
    ) -> Self {
        Self {
            agent,
            store,
            prompts_dir: prompts_dir.into(),
            retry,
            context,
        }
    }

    pub async fn run(&self, phase: Phase, extra_context: Option<&str>) -> bool {
        let template_path = self.prompts_dir.join(format!("{}.md", phase.name()));
        let template = match tokio::fs::read_to_string(&template_path).await {
            Ok(template) => template,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(phase = %phase, "No template, skipping phase");
                return true;
            }
            Err(e) => {
                tracing::error!(phase = %phase, error = %e, "Failed to read phase template");
                return false;
            }
        };

        let mut context = self.context.clone();
        context.last_test_output = self.store.load(keys::LAST_TEST_OUTPUT, "").await;
        context.last_review_feedback = self.store.load(keys::LAST_REVIEW_FEEDBACK, "").await;

        let rendered = match prompt::render(&template, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!(phase = %phase, error = %e, "Failed to render phase template");
                return false;
            }
        };
        let prompt = prompt::with_extra_context(rendered, extra_context);

        if let Err(e) = self.store.save(&keys::prompt(phase.name()), &prompt).await {
            tracing::warn!(phase = %phase, error = %e, "Failed to persist rendered prompt");
        }

        tracing::info!(phase = %phase, "Running phase");

        let agent = &self.agent;
        let prompt = prompt.as_str();
        let retry = self.retry;
        let result = retry
            .run(move |attempt| async move {
                let result = agent.invoke(prompt).await;
                if let Err(e) = &result {
                    if !retry.is_last(attempt) {
                        tracing::warn!(phase = %phase, attempt, error = %e, "Phase attempt failed");
                    }
                }
                result
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(phase = %phase, "Phase completed");
                true
            }
            Err(exhausted) => {
                tracing::error!(
                    phase = %phase,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "Phase failed"
                );
                false
            }
        }
    }
}
