use std::time::Duration;

/// Retry behavior for one job type.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Event dispatch: cheap, retried quickly.
    pub fn lightweight() -> Self {
        Self::exponential(3, Duration::from_secs(5), Duration::from_secs(60))
    }

    /// Recording resolution. Each attempt already polls for minutes.
    pub fn poller() -> Self {
        Self::exponential(3, Duration::from_secs(30), Duration::from_secs(10 * 60))
    }

    /// Transcript downloads from provider APIs.
    pub fn content() -> Self {
        Self::exponential(6, Duration::from_secs(30), Duration::from_secs(30 * 60))
    }

    /// Delay before the next run after `attempt` failed attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let mut delay = self.base_delay.as_millis() as f64;
        for _ in 1..attempt {
            delay *= self.backoff_multiplier;
            if delay >= self.max_delay.as_millis() as f64 {
                break;
            }
        }

        let delay_ms = delay.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::lightweight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy::lightweight();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(50), Duration::from_secs(60));
    }

    #[test]
    fn test_content_policy_caps_at_thirty_minutes() {
        let policy = RetryPolicy::content();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(6), Duration::from_secs(960));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1800));
    }
}
