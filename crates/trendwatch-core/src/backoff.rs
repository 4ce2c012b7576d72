use std::time::Duration;

/// Exponential backoff used after a rate-limited upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(60));

        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(4), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn is_monotonic_in_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(30));
        let delays = (0..12).map(|attempt| policy.delay(attempt)).collect::<Vec<_>>();

        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(30)));
    }
}
