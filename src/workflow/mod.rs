pub mod dispatch;
pub mod finalize;
pub mod phase;
pub mod review;
pub mod session;
pub mod suggest;
pub mod test_cycle;
pub mod types;

pub use dispatch::Orchestrator;
