use std::time::Duration;

/// How retry delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry policy interpreted by the job manager, decoupled from any queue
/// library's option bag.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    /// Classification jobs: 3 attempts, exponential backoff starting at 60s.
    pub fn classification() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(60),
            backoff: BackoffKind::Exponential,
        }
    }

    /// Delay to wait after the given 1-based attempt fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.backoff_base,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.backoff_base.saturating_mul(factor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::classification();
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(120));
        assert_eq!(policy.delay_after(3), Duration::from_secs(240));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_secs(30),
            backoff: BackoffKind::Fixed,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(4), Duration::from_secs(30));
    }
}
