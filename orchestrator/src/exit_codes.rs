//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded (run resolved the issue, plan proposed, decision applied).
pub const OK: i32 = 0;
/// Invalid input, invalid configuration, or any other error.
pub const INVALID: i32 = 1;
/// The run exhausted its retries or planning failed.
pub const FAILED: i32 = 2;
/// `evaluate` produced a rejected, ignored, or busy decision.
pub const REJECTED: i32 = 3;
