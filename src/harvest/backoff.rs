//! Rate-limit backoff policy.

use std::time::Duration;

/// Base wait after a rate-limited response.
pub const BASE_DELAY: Duration = Duration::from_secs(60);

/// Upper bound for the exponential mode.
pub const MAX_DELAY: Duration = Duration::from_secs(600);

/// Growth factor applied per consecutive rate-limit hit.
const RATIO: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    /// Always wait the base delay.
    Fixed,
    /// `base * (1 + 2 * attempt)`, capped.
    Exponential,
}

/// Converts a consecutive rate-limit counter into a wait duration.
///
/// Pure: the caller sleeps on the returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub mode: BackoffMode,
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn fixed() -> Self {
        Self {
            mode: BackoffMode::Fixed,
            base: BASE_DELAY,
            cap: MAX_DELAY,
        }
    }

    #[must_use]
    pub const fn exponential() -> Self {
        Self {
            mode: BackoffMode::Exponential,
            base: BASE_DELAY,
            cap: MAX_DELAY,
        }
    }

    /// Policy selected by the `ENABLE_EXPONENTIAL_BACKOFF` flag.
    #[must_use]
    pub const fn from_flag(exponential: bool) -> Self {
        if exponential {
            Self::exponential()
        } else {
            Self::fixed()
        }
    }

    /// Wait before retrying after the `attempt`-th consecutive rate limit (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.mode {
            BackoffMode::Fixed => self.base,
            BackoffMode::Exponential => {
                let factor = attempt.saturating_mul(RATIO).saturating_add(1);
                self.base.saturating_mul(factor).min(self.cap)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_is_constant() {
        let policy = BackoffPolicy::fixed();
        for attempt in [0, 1, 5, 100, u32::MAX] {
            assert_eq!(policy.delay(attempt), BASE_DELAY);
        }
    }

    #[test]
    fn test_exponential_values() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.delay(0), Duration::from_secs(60));
        assert_eq!(policy.delay(1), Duration::from_secs(180));
        assert_eq!(policy.delay(2), Duration::from_secs(300));
        assert_eq!(policy.delay(4), Duration::from_secs(540));
        assert_eq!(policy.delay(5), Duration::from_secs(600));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_exponential_monotonic_and_capped() {
        let policy = BackoffPolicy::exponential();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= MAX_DELAY);
            previous = delay;
        }
    }

    #[test]
    fn test_from_flag() {
        assert_eq!(BackoffPolicy::from_flag(false).mode, BackoffMode::Fixed);
        assert_eq!(BackoffPolicy::from_flag(true).mode, BackoffMode::Exponential);
    }
}
