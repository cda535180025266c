//! Retry policy: a fixed backoff table plus the retry/give-up decision.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Whether a job that has failed `attempt_count` times may run again.
pub fn should_retry(attempt_count: u32, bound: u32) -> bool {
    attempt_count < bound
}

/// Retry policy configuration.
///
/// The schedule is a precomputed table indexed by attempt number (1-based). Its
/// length is the retry bound, so `backoff(k)` is defined for `1..=bound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    table: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// 1s, 4s, 9s with a bound of 3.
    fn default() -> Self {
        Self::quadratic(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Build a policy from an explicit schedule.
    ///
    /// The table must be non-decreasing; an empty table means jobs are never retried.
    pub fn from_table(table: Vec<Duration>) -> DomainResult<Self> {
        if let Some(pos) = table.windows(2).position(|w| w[0] > w[1]) {
            return Err(DomainError::validation(format!(
                "backoff table must be non-decreasing (entry {} > entry {})",
                pos + 1,
                pos + 2
            )));
        }
        Ok(Self { table })
    }

    /// `k² · unit` for `k` in `1..=bound`.
    pub fn quadratic(bound: u32, unit: Duration) -> Self {
        let table = (1..=bound).map(|k| unit * (k * k)).collect();
        Self { table }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self { table: Vec::new() }
    }

    /// Maximum number of failed attempts before a job is failed permanently.
    pub fn bound(&self) -> u32 {
        self.table.len() as u32
    }

    pub fn table(&self) -> &[Duration] {
        &self.table
    }

    /// Delay before re-enqueuing after failure number `attempt_count`.
    ///
    /// Returns `None` for attempt 0 or past the bound; callers are expected to
    /// have checked [`RetryPolicy::should_retry`] first.
    pub fn backoff(&self, attempt_count: u32) -> Option<Duration> {
        let idx = attempt_count.checked_sub(1)?;
        self.table.get(idx as usize).copied()
    }

    pub fn should_retry(&self, attempt_count: u32) -> bool {
        should_retry(attempt_count, self.bound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule_is_one_four_nine() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.bound(), 3);
        assert_eq!(policy.backoff(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.backoff(3), Some(Duration::from_secs(9)));
    }

    #[test]
    fn backoff_outside_table_is_none() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), None);
        assert_eq!(policy.backoff(4), None);
    }

    #[test]
    fn should_retry_respects_bound() {
        assert!(should_retry(0, 3));
        assert!(should_retry(2, 3));
        assert!(!should_retry(3, 3));
        assert!(!should_retry(4, 3));

        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.bound(), 0);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn decreasing_table_is_rejected() {
        let err = RetryPolicy::from_table(vec![
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(3),
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("entry 2 > entry 3")));
    }

    #[test]
    fn plateaus_are_allowed() {
        let policy = RetryPolicy::from_table(vec![
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(30),
        ])
        .unwrap();
        assert_eq!(policy.bound(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any accepted table yields backoff(k) <= backoff(k + 1).
        #[test]
        fn backoff_is_monotonic(mut millis in prop::collection::vec(0u64..100_000u64, 0..12)) {
            millis.sort_unstable();
            let policy = RetryPolicy::from_table(
                millis.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            ).unwrap();

            for k in 1..policy.bound() {
                prop_assert!(policy.backoff(k).unwrap() <= policy.backoff(k + 1).unwrap());
            }
        }

        /// Property: should_retry is true exactly for attempts below the bound.
        #[test]
        fn quadratic_bound_matches_table(bound in 0u32..10, attempt in 0u32..20) {
            let policy = RetryPolicy::quadratic(bound, Duration::from_millis(10));
            prop_assert_eq!(policy.table().len() as u32, bound);
            prop_assert_eq!(policy.should_retry(attempt), attempt < bound);
            prop_assert_eq!(policy.backoff(attempt).is_some(), attempt >= 1 && attempt <= bound);
        }
    }
}
