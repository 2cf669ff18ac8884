use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hyphae::agent::CliAgent;
use hyphae::config::AppConfig;
use hyphae::host::GitHubHost;
use hyphae::platform::github::{auth, GitHubPlatform};
use hyphae::platform::parse_repo;
use hyphae::state::StateStore;
use hyphae::test_runner::CommandTestRunner;
use hyphae::workflow::types::{RunRequest, WorkflowMode};
use hyphae::workflow::Orchestrator;
use hyphae::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(
    name = "hyphae",
    about = "Resolve, suggest and review GitHub issues with an AI coding agent"
)]
struct Cli {
    /// Repository as owner/repo
    repo: String,

    /// Issue number to work on (required in resolve mode)
    issue: Option<u64>,

    /// Workflow to run: resolve, suggest or review
    #[arg(short, long)]
    mode: Option<String>,

    /// Working branch (defaults to a name derived from mode and issue)
    #[arg(short, long)]
    branch: Option<String>,

    /// Number of follow-up issues to suggest
    #[arg(long)]
    count: Option<String>,

    /// Log mutations instead of performing them
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.workflow.mode = Some(mode);
    }
    if let Some(count) = cli.count {
        config.workflow.suggested_issues_count = Some(count);
    }
    config.workflow.dry_run |= cli.dry_run;
    config.workflow.verbose |= cli.verbose;

    init_tracing(config.workflow.verbose, cli.log_format);

    // Everything below must be valid before the first side effect
    if parse_repo(&cli.repo).is_none() {
        bail!("Invalid repository '{}': expected owner/repo", cli.repo);
    }
    let mode = config.workflow_mode()?;
    if mode == WorkflowMode::Resolve && cli.issue.is_none() {
        bail!("The resolve workflow needs an issue number");
    }
    config.validate_credentials()?;

    let branch = cli
        .branch
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| mode.default_branch_name(cli.issue));

    if !config.agent.prompts_dir.is_dir() {
        tracing::warn!(
            dir = %config.agent.prompts_dir.display(),
            "Prompts directory not found, every phase will be skipped"
        );
    }

    let token = auth::resolve_token(&config.github, &cli.repo).await?;
    let platform = GitHubPlatform::new(&token)?;

    let workspaces = WorkspaceManager::new(&config.workspace);
    let checkout_dir = workspaces.workspace_path(&cli.repo, &branch);

    let store = StateStore::open(StateStore::run_dir(
        &config.state_root(),
        &cli.repo,
        mode,
        cli.issue,
    ))
    .await?;
    tracing::debug!(dir = %store.dir().display(), "Using state directory");

    let agent = CliAgent::new(
        &config.agent.command,
        config.agent.args.clone(),
        &checkout_dir,
        store.dir(),
    );
    let tests = CommandTestRunner::new(&checkout_dir, config.tests.command.clone());
    let host = GitHubHost::new(platform, workspaces, &cli.repo, &token);

    let orchestrator = Orchestrator::new(
        Arc::new(agent),
        Arc::new(tests),
        Arc::new(host),
        store,
        config.agent.prompts_dir.clone(),
        config.workflow_settings(),
    );

    let outcome = orchestrator
        .run(RunRequest {
            repo_full_name: cli.repo,
            issue: cli.issue,
            mode,
            branch,
        })
        .await;

    tracing::info!(outcome = ?outcome, "Workflow finished");
    std::process::exit(outcome.exit_code());
}
