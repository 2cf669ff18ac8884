pub mod cli;
pub mod prompt;

use async_trait::async_trait;

use crate::error::Result;

pub use cli::CliAgent;

/// The external code-generation agent.
///
/// The orchestrator never looks at what the agent says; an invocation either
/// completes or fails, and anything the agent wants to hand back is written to
/// the state directory.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<()>;
}
