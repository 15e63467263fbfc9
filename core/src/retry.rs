use std::time::Duration;

use crate::backend::BackendError;

/// Policy parameters for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay used for the first retry attempt.
    pub base_delay: Duration,
    /// Maximum exponential backoff delay.
    pub max_delay: Duration,
    /// Maximum number of retry attempts allowed after the first call.
    pub max_retries: u32,
    /// Upper bound for delays requested by the backend itself.
    pub hint_window: Duration,
}

impl RetryPolicy {
    /// Creates a new [`RetryPolicy`]. Server hints are capped at `max_delay`
    /// until [`RetryPolicy::with_hint_window`] says otherwise.
    pub const fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            hint_window: max_delay,
        }
    }

    pub const fn with_hint_window(mut self, hint_window: Duration) -> Self {
        self.hint_window = hint_window;
        self
    }

    /// Policy that never waits between attempts.
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, max_retries)
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Decision made by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay_ms: u64,
    pub used_hint: bool,
}

impl RetryDecision {
    const fn no_retry() -> Self {
        Self {
            should_retry: false,
            delay_ms: 0,
            used_hint: false,
        }
    }

    fn retry_with(delay: Duration, used_hint: bool, cap: Duration) -> Self {
        let capped = delay.min(cap);
        let delay_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        Self {
            should_retry: true,
            delay_ms,
            used_hint,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Calculates the next retry decision based on the provided error, policy and
/// number of previous retries.
pub fn evaluate_retry(error: &BackendError, policy: RetryPolicy, previous_retries: u32) -> RetryDecision {
    if previous_retries >= policy.max_retries || !error.is_retryable() {
        return RetryDecision::no_retry();
    }

    if let Some(hint) = error.retry_after() {
        return RetryDecision::retry_with(hint, true, policy.hint_window);
    }

    let delay = compute_exponential_backoff(policy.base_delay, policy.max_delay, previous_retries);
    RetryDecision::retry_with(delay, false, policy.max_delay)
}

fn compute_exponential_backoff(base: Duration, max_delay: Duration, previous_retries: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(0);
    }

    let multiplier = 1u128.checked_shl(previous_retries).unwrap_or(u128::MAX);
    let delay_ms = base.as_millis().saturating_mul(multiplier);
    let capped_ms = delay_ms.min(max_delay.as_millis());
    Duration::from_millis(u64::try_from(capped_ms).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RetryPolicy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 5);

    fn throttled(hint: Option<Duration>) -> BackendError {
        BackendError::Throttled {
            message: "rate exceeded".into(),
            retry_after: hint,
        }
    }

    #[test]
    fn uses_hint_delay_when_available() {
        let decision = evaluate_retry(&throttled(Some(Duration::from_secs(19))), POLICY, 0);

        assert!(decision.should_retry);
        assert!(decision.used_hint);
        assert_eq!(decision.delay_ms, 19_000);
    }

    #[test]
    fn hint_is_capped_by_hint_window() {
        let policy = POLICY.with_hint_window(Duration::from_secs(10));
        let decision = evaluate_retry(&throttled(Some(Duration::from_secs(600))), policy, 0);
        assert_eq!(decision.delay_ms, 10_000);
    }

    #[test]
    fn exponential_backoff_without_hint() {
        let error = throttled(None);
        let first = evaluate_retry(&error, POLICY, 0);
        let second = evaluate_retry(&error, POLICY, 1);
        let third = evaluate_retry(&error, POLICY, 2);

        assert_eq!(first.delay_ms, 1_000);
        assert_eq!(second.delay_ms, 2_000);
        assert_eq!(third.delay_ms, 4_000);
        assert!(!first.used_hint);
        assert!(!third.used_hint);
    }

    #[test]
    fn respects_max_delay_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(4), Duration::from_secs(10), 5);
        let decision = evaluate_retry(
            &BackendError::Transient {
                message: "503".into(),
            },
            policy,
            3,
        );

        assert_eq!(decision.delay_ms, 10_000);
    }

    #[test]
    fn stops_after_max_retries() {
        let policy = RetryPolicy::immediate(2);
        let error = BackendError::Unreachable {
            message: "connection reset".into(),
        };
        assert!(evaluate_retry(&error, policy, 1).should_retry);
        assert!(!evaluate_retry(&error, policy, 2).should_retry);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn non_retryable_errors_fail_fast() {
        let decision = evaluate_retry(
            &BackendError::Rejected {
                message: "bad request".into(),
            },
            POLICY,
            0,
        );

        assert!(!decision.should_retry);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), u32::MAX);
        let decision = evaluate_retry(&throttled(None), policy, 200);
        assert_eq!(decision.delay_ms, 30_000);
    }
}
