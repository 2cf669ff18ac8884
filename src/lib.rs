pub mod agent;
pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod retry;
pub mod state;
pub mod test_runner;
pub mod workflow;
pub mod workspace;

#[cfg(test)]
mod testing;
