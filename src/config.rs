use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::workflow::types::{WorkflowMode, WorkflowSettings};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub tests: TestsConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct GitHubConfig {
    /// Personal access token. Takes precedence over GitHub App credentials.
    pub token: Option<String>,
    pub app_id: Option<u64>,
    pub private_key_path: Option<PathBuf>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_phase_retry_delay_secs")]
    pub phase_retry_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// One of `resolve`, `suggest`, `review`.
    pub mode: Option<String>,
    /// Deprecated: use `mode = "suggest"`.
    #[serde(default)]
    pub suggest_only: bool,
    #[serde(default = "default_max_test_cycles")]
    pub max_test_cycles: u32,
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,
    #[serde(default = "default_max_phase_attempts")]
    pub max_phase_attempts: u32,
    /// Kept as raw text so that malformed values can be reported and skipped.
    pub suggested_issues_count: Option<String>,
    #[serde(default = "default_suggestion_label")]
    pub suggestion_label: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
    /// Defaults to `<base_dir>/state`.
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TestsConfig {
    /// Shell command overriding test command detection.
    pub command: Option<String>,
}

fn default_agent_command() -> String {
    "opencode".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_phase_retry_delay_secs() -> u64 {
    10
}

fn default_max_test_cycles() -> u32 {
    5
}

fn default_max_review_cycles() -> u32 {
    2
}

fn default_max_phase_attempts() -> u32 {
    3
}

fn default_suggestion_label() -> String {
    "ai-suggested".to_string()
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/hyphae-workspaces")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            prompts_dir: default_prompts_dir(),
            phase_retry_delay_secs: default_phase_retry_delay_secs(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mode: None,
            suggest_only: false,
            max_test_cycles: default_max_test_cycles(),
            max_review_cycles: default_max_review_cycles(),
            max_phase_attempts: default_max_phase_attempts(),
            suggested_issues_count: None,
            suggestion_label: default_suggestion_label(),
            dry_run: false,
            verbose: false,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
            state_dir: None,
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("hyphae").required(false));
        }

        // Environment variable overrides with HYPHAE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("HYPHAE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Resolve the active workflow mode.
    ///
    /// The explicit `mode` wins; the deprecated `suggest_only` flag is consulted
    /// next; everything else runs `resolve`.
    pub fn workflow_mode(&self) -> Result<WorkflowMode> {
        if let Some(mode) = self.workflow.mode.as_deref().filter(|m| !m.trim().is_empty()) {
            return mode.parse();
        }
        if self.workflow.suggest_only {
            tracing::warn!("`workflow.suggest_only` is deprecated, use `workflow.mode = \"suggest\"`");
            return Ok(WorkflowMode::Suggest);
        }
        Ok(WorkflowMode::Resolve)
    }

    /// Ensure some form of GitHub credentials is present.
    pub fn validate_credentials(&self) -> Result<()> {
        let token_set = self
            .github
            .token
            .as_deref()
            .is_some_and(|t| !t.is_empty());
        let app_set = self.github.app_id.is_some() && self.github.private_key_path.is_some();

        if token_set || app_set {
            Ok(())
        } else {
            Err(AppError::Config(
                "Either github.token or both github.app_id and github.private_key_path must be set"
                    .to_string(),
            ))
        }
    }

    pub fn state_root(&self) -> PathBuf {
        self.workspace
            .state_dir
            .clone()
            .unwrap_or_else(|| self.workspace.base_dir.join("state"))
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            max_test_cycles: self.workflow.max_test_cycles,
            max_review_cycles: self.workflow.max_review_cycles,
            max_phase_attempts: self.workflow.max_phase_attempts,
            phase_retry_delay: Duration::from_secs(self.agent.phase_retry_delay_secs),
            suggested_issues_count: self.workflow.suggested_issues_count.clone(),
            suggestion_label: self.workflow.suggestion_label.clone(),
            dry_run: self.workflow.dry_run,
        }
    }
}
