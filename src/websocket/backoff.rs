use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff bookkeeping for reconnect attempts.
///
/// `attempts` counts consecutive failed or dropped connections since the last
/// successful open.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// `min(initial * 2^(attempt-1), max)`, with `attempt` starting at 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self
            .config
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Records a failed/dropped connection and returns the delay before the
    /// next attempt, or `None` once `max_attempts` has been reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for_attempt(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_sequence() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        let delays: Vec<u64> = (0..8)
            .map(|_| scheduler.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        let scheduled = std::iter::from_fn(|| scheduler.next_delay()).count();
        assert_eq!(scheduled, 15);
        assert_eq!(scheduler.attempts(), 15);
        assert!(scheduler.next_delay().is_none());
    }

    #[test]
    fn test_reset_restarts_from_initial_delay() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        scheduler.next_delay();
        scheduler.next_delay();
        scheduler.next_delay();
        scheduler.reset();
        assert_eq!(scheduler.attempts(), 0);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let scheduler = ReconnectScheduler::new(ReconnectConfig {
            max_attempts: u32::MAX,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        });
        assert_eq!(scheduler.delay_for_attempt(200), Duration::from_millis(10_000));
        assert_eq!(scheduler.delay_for_attempt(1), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });
        assert!(scheduler.next_delay().is_none());
    }
}
