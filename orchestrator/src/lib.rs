//! Response-to-changeset orchestrator.
//!
//! Turns a model's free-form response into a validated set of file operations,
//! applies them to a fresh working tree, verifies them with a test command, and
//! retries with feedback until the tests pass or the budget is spent. An
//! approval state machine replays issue activity (labels, comments, reactions)
//! to decide what the platform should do next.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, approval replay, diffs,
//!   reports). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   collaborator adapters). Isolated behind traits to enable scripted tests.
//!
//! Orchestration modules ([`retry`], [`planning`], [`run`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod planning;
pub mod retry;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
