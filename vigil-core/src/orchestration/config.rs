use serde::{Deserialize, Serialize};

/// Retry/backoff policy shared by the queue and its housekeeper.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delivery attempts before a message is dead-lettered.
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 5 * 60 * 1_000,
            jitter_ratio: 0.25,
        }
    }
}

impl RetryConfig {
    fn base_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = (attempt.saturating_sub(1)) as i32;
        let scaled = (self.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    /// Exponential backoff with a jitter spread so simultaneous failures
    /// do not retry in lockstep.
    pub fn jittered_delay_ms(&self, attempt: u16, rng: &mut impl rand::Rng) -> u64 {
        let base = self.base_delay_ms(attempt);
        if base == 0 {
            return 0;
        }

        let upper_cap = self.backoff_max_ms.max(1);
        let capped = base.min(upper_cap);
        let spread = (capped as f64 * f64::from(self.jitter_ratio)).max(1.0);
        let lower = (capped as f64 - spread).max(1.0);
        let upper = (capped as f64 + spread).min(upper_cap as f64);

        rng.random_range(lower..=upper).round() as u64
    }
}

/// Global knobs that tune orchestrator behaviour.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of concurrent worker tasks polling the queue.
    pub workers: usize,
    /// Sleep between polls when the queue is empty (ms).
    pub poll_interval_ms: u64,
    /// Visibility window: a delivered message stays hidden from other
    /// consumers until this lease expires (seconds).
    pub visibility_timeout_secs: i64,
    /// Hard ceiling on a single scan-engine invocation (seconds).
    pub scan_timeout_secs: u64,
    /// A `scanning` job whose claim is older than this is treated as
    /// stalled and becomes reclaimable (seconds).
    pub reclaim_grace_secs: i64,
    /// Housekeeping cadence for lease expiry and dead-letter
    /// reconciliation (ms).
    pub housekeeper_interval_ms: u64,
    /// Retry/backoff policy for redeliveries.
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1_000,
            visibility_timeout_secs: 900,
            scan_timeout_secs: 600,
            reclaim_grace_secs: 1_200,
            housekeeper_interval_ms: 15_000,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 6_000,
            jitter_ratio: 0.25,
        };

        assert_eq!(retry.base_delay_ms(0), 0);
        assert_eq!(retry.base_delay_ms(1), 1_000);
        assert_eq!(retry.base_delay_ms(2), 2_000);
        assert_eq!(retry.base_delay_ms(3), 4_000);
        assert_eq!(retry.base_delay_ms(4), 6_000);
        assert_eq!(retry.base_delay_ms(10), 6_000);
    }

    #[test]
    fn jitter_stays_within_spread() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            jitter_ratio: 0.25,
        };
        let mut rng = rand::rng();

        for _ in 0..100 {
            let delay = retry.jittered_delay_ms(2, &mut rng);
            assert!((1_500..=2_500).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn zero_base_disables_backoff() {
        let retry = RetryConfig {
            backoff_base_ms: 0,
            ..RetryConfig::default()
        };
        let mut rng = rand::rng();
        assert_eq!(retry.jittered_delay_ms(3, &mut rng), 0);
    }
}
