//! Reconnect policy and backoff.

use std::time::Duration;

/// Delays for the first attempts, in milliseconds.
const SCHEDULE_MS: [u64; 9] = [10, 50, 100, 150, 200, 250, 500, 1_000, 2_000];

/// Delay once the schedule is exhausted.
pub const MAX_DELAY: Duration = Duration::from_millis(5_000);

/// Whether and how often a lost transport is re-established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Give up after this many attempts in a row. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Never reconnect. This is the default.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Reconnect forever.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Delay before the given attempt (1-based).
#[must_use]
pub fn delay_for(attempt: u32) -> Duration {
    let idx = attempt.saturating_sub(1) as usize;
    SCHEDULE_MS
        .get(idx)
        .map_or(MAX_DELAY, |ms| Duration::from_millis(*ms))
}

/// Attempt counter for one outage.
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        delay_for(self.attempts)
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether `policy` allows another attempt.
    #[must_use]
    pub fn may_retry(&self, policy: &ReconnectPolicy) -> bool {
        policy.enabled && policy.max_attempts.map_or(true, |max| self.attempts < max)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..11).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            [10, 50, 100, 150, 200, 250, 500, 1_000, 2_000, 5_000, 5_000]
        );
        assert_eq!(backoff.attempts(), 11);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy::enabled().with_max_attempts(2);
        let mut backoff = Backoff::new();
        assert!(backoff.may_retry(&policy));
        backoff.next_delay();
        assert!(backoff.may_retry(&policy));
        backoff.next_delay();
        assert!(!backoff.may_retry(&policy));

        assert!(!Backoff::new().may_retry(&ReconnectPolicy::disabled()));
        assert!(Backoff::new().may_retry(&ReconnectPolicy::enabled()));
    }
}
