//! Retry bookkeeping with exponential backoff.
//!
//! Failed submissions are not retried in-process: the next attempt happens
//! on a later tick once `ai_next_retry_at` has passed. This module computes
//! that schedule and the terminal transition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use memalerts_db::FailureUpdate;
use memalerts_models::AiStatus;

/// Exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Attempts before the row becomes `failed_final`.
    pub max_retries: i32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(3600),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: i32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// Delay after a failure, given the retry count before it.
    pub fn delay_for_attempt(&self, prev_retry_count: i32) -> Duration {
        let exp = prev_retry_count.clamp(0, 31) as u32;
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether a candidate has already used up its budget.
    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_retries
    }

    /// Bookkeeping for a failed attempt.
    ///
    /// The retry count is incremented; reaching the budget is terminal,
    /// otherwise the next attempt is scheduled after the backoff delay.
    pub fn plan_failure(
        &self,
        prev_retry_count: i32,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> FailureUpdate {
        let retry_count = prev_retry_count.saturating_add(1);
        let error = error.into();

        if self.is_exhausted(retry_count) {
            return FailureUpdate {
                status: AiStatus::FailedFinal,
                retry_count,
                next_retry_at: None,
                error,
            };
        }

        let delay = self.delay_for_attempt(prev_retry_count);
        let next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        FailureUpdate {
            status: AiStatus::Failed,
            retry_count,
            next_retry_at,
            error,
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by the scheduler loop so a database outage does not log the same
/// failure on every tick.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Tick recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further tick failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_calculation() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[test]
    fn test_backoff_max_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(3600));
        assert_eq!(policy.delay_for_attempt(i32::MAX), Duration::from_secs(3600));
        assert_eq!(policy.delay_for_attempt(-1), Duration::from_secs(5));
    }

    #[test]
    fn test_plan_failure_schedules_retry() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();

        let update = policy.plan_failure(0, now, "boom");
        assert_eq!(update.status, AiStatus::Failed);
        assert_eq!(update.retry_count, 1);
        assert_eq!(update.next_retry_at, Some(now + chrono::Duration::seconds(5)));
        assert_eq!(update.error, "boom");

        let update = policy.plan_failure(2, now, "boom");
        assert_eq!(update.retry_count, 3);
        assert_eq!(update.next_retry_at, Some(now + chrono::Duration::seconds(20)));
    }

    #[test]
    fn test_plan_failure_reaching_budget_is_final() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();

        let update = policy.plan_failure(4, now, "boom");
        assert_eq!(update.status, AiStatus::FailedFinal);
        assert_eq!(update.retry_count, 5);
        assert_eq!(update.next_retry_at, None);
    }

    #[test]
    fn test_zero_budget_fails_immediately() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(60), 0);
        assert!(policy.is_exhausted(0));
        assert_eq!(
            policy.plan_failure(0, Utc::now(), "x").status,
            AiStatus::FailedFinal
        );
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // 4th failure triggers suppression message (returns false)
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);

        assert!(tracker.record_failure());
    }
}
