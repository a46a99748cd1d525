//! Bounded exponential backoff shared by enrichment and dispatch
//!
//! Both external boundaries (lookup store, inference sink) retry transient
//! failures with the same policy shape: exponential delay growth capped at a
//! maximum, with optional jitter to avoid thundering-herd retries across
//! partitions.

use std::time::Duration;

/// Retry schedule with exponential backoff
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Randomize each delay by +/- 20% to decorrelate retries
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Whether another attempt is allowed after `attempts` tries so far.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Doubles per retry, capped at `max_delay`, jittered if enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let base_ms = self.initial_delay.as_millis() as u64;
        let delay = Duration::from_millis(base_ms.saturating_mul(1u64 << exponent));
        let capped = delay.min(self.max_delay);

        if self.jitter {
            add_jitter(capped)
        } else {
            capped
        }
    }
}

fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.8..1.2);
    Duration::from_millis(((delay.as_millis() as f64) * jitter_factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_growth_with_cap() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        // 400ms capped at 350ms
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_attempt_budget() {
        let p = policy();
        assert!(p.allows_retry(1));
        assert!(p.allows_retry(3));
        assert!(!p.allows_retry(4));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let p = BackoffPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..100 {
            let d = p.delay_for(1).as_millis() as f64;
            assert!((80.0..120.0).contains(&d), "jittered delay {} out of band", d);
        }
    }
}
