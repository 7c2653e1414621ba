//! Per-attempt time budget shared by model invocation and testing.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::core::errors::TimedOut;

/// Return the remaining time budget until the provided deadline.
///
/// Fails with [`TimedOut`] naming `stage` once the deadline has passed.
pub fn remaining_budget(deadline: Instant, stage: &'static str) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(TimedOut { stage }.into());
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_deadline_leaves_budget() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let remaining = remaining_budget(deadline, "model").expect("budget");
        assert!(remaining <= Duration::from_secs(60));
    }

    #[test]
    fn elapsed_deadline_is_a_typed_timeout() {
        let err = remaining_budget(Instant::now(), "tests").unwrap_err();
        assert_eq!(
            err.downcast_ref::<TimedOut>(),
            Some(&TimedOut { stage: "tests" })
        );
    }
}
