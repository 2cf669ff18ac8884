use std::sync::Arc;

use crate::host::Host;
use crate::state::StateStore;
use crate::test_runner::TestRunner;
use crate::workflow::phase::PhaseRunner;
use crate::workflow::types::WorkflowSettings;

/// Collaborators and settings shared by the cycle controllers of one run.
pub struct Session {
    pub settings: WorkflowSettings,
    pub phases: PhaseRunner,
    pub store: StateStore,
    pub tests: Arc<dyn TestRunner>,
    pub host: Arc<dyn Host>,
    pub repo_full_name: String,
    pub issue: Option<u64>,
}
