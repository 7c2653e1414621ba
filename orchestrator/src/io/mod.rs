//! I/O helpers and collaborator adapters for orchestrator commands.

pub mod applier;
pub mod attempt_log;
pub mod config;
pub mod git;
pub mod issue_store;
pub mod model;
pub mod process;
pub mod prompt;
pub mod run_lock;
pub mod test_runner;
pub mod worktree;
