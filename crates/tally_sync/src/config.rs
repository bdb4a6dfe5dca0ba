//! Configuration for the sync engine.

use std::time::Duration;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on rows per remote read or append.
    pub page_size: u64,
    /// How many times a conflicted push is retried after a fresh pull before
    /// the engine rebuilds.
    pub max_conflict_retries: u32,
    /// Retry configuration for provider failures.
    pub retry: RetryConfig,
    /// Timeout for a single remote call.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_conflict_retries: 1,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the page size. Zero is raised to one.
    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets how many conflicted pushes are retried before rebuilding.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the remote call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff between attempts of [`crate::SyncEngine::sync_with_retry`].
///
/// The wait grows by `backoff_multiplier` after every failed attempt and is
/// clamped to `max_delay`. Jitter, when enabled, is added after the clamp, so
/// a single wait can reach `max_delay * 1.25`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Clamp applied before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Add up to a quarter of the wait so devices sharing a log do not
    /// retry in lockstep.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// `max_attempts` attempts, starting at 200 ms and doubling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the wait before the second attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the clamp applied before jitter.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor between waits.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Wait before attempt `attempt`, counted from zero. The first attempt
    /// never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(steps) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let steps = i32::try_from(steps).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(steps);
        let delay = if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0)).min(self.max_delay)
        } else {
            self.max_delay
        };

        if self.add_jitter {
            delay + delay.mul_f64(0.25 * jitter_fraction())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_page_size(0)
            .with_max_conflict_retries(3)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.page_size, 1);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(SyncConfig::default().page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn single_attempt_never_waits() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn delay_grows_by_multiplier() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(125))
            .with_backoff_multiplier(4.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(125));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn clamp_holds_without_jitter() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn jitter_adds_at_most_a_quarter_past_the_clamp() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        for attempt in [4, 5, 40] {
            let delay = config.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_millis(6250));
        }
    }
}
