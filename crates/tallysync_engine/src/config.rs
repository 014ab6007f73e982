//! Orchestrator and worker settings.

use rand::Rng;
use std::time::Duration;

/// Settings of one tenant's orchestrator and worker.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry configuration for transient remote failures.
    pub retry: RetryConfig,
    /// Interval for the background worker to re-check every known key.
    pub sync_interval: Option<Duration>,
    /// How long a synced key is trusted before a read schedules a re-check.
    pub stale_after: Duration,
    /// How many superseded rounds `flush` tolerates before giving up.
    pub max_coalesce_rounds: u32,
    /// Drop tombstones already covered by the checkpoint after each sync.
    pub compact_on_sync: bool,
    /// Maximum number of conflict records kept per tenant.
    pub max_conflict_records: usize,
}

impl SyncConfig {
    /// Background retries on, no periodic re-check, a one-minute staleness window.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            sync_interval: None,
            stale_after: Duration::from_secs(60),
            max_coalesce_rounds: 8,
            compact_on_sync: false,
            max_conflict_records: 100,
        }
    }

    /// Replaces the offline retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Re-checks every known key on this period, even without local writes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the staleness window for reads.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the number of superseded rounds tolerated by `flush`.
    pub fn with_max_coalesce_rounds(mut self, rounds: u32) -> Self {
        self.max_coalesce_rounds = rounds.max(1);
        self
    }

    /// Enables or disables tombstone compaction after each sync.
    pub fn with_compact_on_sync(mut self, enabled: bool) -> Self {
        self.compact_on_sync = enabled;
        self
    }

    /// Sets how many conflict records are retained.
    pub fn with_max_conflict_records(mut self, max: usize) -> Self {
        self.max_conflict_records = max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff for keys whose remote is unreachable.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Offline rounds over which the delay grows. Later rounds poll at
    /// `max_delay` until the remote answers.
    pub max_attempts: u32,
    /// Delay after the first offline round.
    pub initial_delay: Duration,
    /// Upper bound of the delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per further round.
    pub backoff_multiplier: f64,
    /// Adds up to 25% random slack on top of the delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Backoff from 100ms up to 30s, doubling, with jitter.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// No automatic retries; offline keys wait for the next write, login or tick.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the first delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Caps the delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Returns true while `attempt` is still on the growing part of the backoff.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next round of a key that has been offline `attempt`
    /// rounds, or `None` if this policy never retries on its own.
    ///
    /// Past `max_attempts` every round waits `max_delay` (plus jitter), so an
    /// outage of any length ends with the key being pushed.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let mut rng = rand::thread_rng();
        self.next_delay_with_rng(attempt, &mut rng)
    }

    /// Same as [`next_delay`](Self::next_delay) with a caller-provided RNG.
    pub fn next_delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        if self.should_retry(attempt) {
            Some(self.delay_with_rng(attempt, rng))
        } else if self.max_delay.is_zero() {
            None
        } else {
            Some(self.jittered(self.max_delay.as_secs_f64(), rng))
        }
    }

    /// Delay before re-queuing a key that has been offline `attempt` rounds.
    /// Zero rounds means no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt) with a caller-provided RNG.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let grown = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        self.jittered(grown.min(self.max_delay.as_secs_f64()), rng)
    }

    fn jittered<R: Rng + ?Sized>(&self, delay_secs: f64, rng: &mut R) -> Duration {
        let total = if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% on top of the base delay
            delay_secs + delay_secs * 0.25 * rng.gen_range(0.0..=1.0)
        } else {
            delay_secs
        };
        Duration::from_nanos((total * 1e9).round() as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn builder_clamps_coalesce_rounds() {
        let config = SyncConfig::new()
            .with_sync_interval(Duration::from_secs(30))
            .with_stale_after(Duration::from_secs(5))
            .with_max_coalesce_rounds(0)
            .with_compact_on_sync(true)
            .with_max_conflict_records(10);

        assert_eq!(config.sync_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.stale_after, Duration::from_secs(5));
        assert_eq!(config.max_coalesce_rounds, 1);
        assert!(config.compact_on_sync);
        assert_eq!(config.max_conflict_records, 10);
    }

    #[test]
    fn single_attempt_policy() {
        let policy = RetryConfig::no_retry();
        assert!(policy.should_retry(0));
        assert!(!policy.should_retry(1));
        assert_eq!(policy.next_delay(1), None);
        assert_eq!(RetryConfig::default().max_attempts, 10);
    }

    #[test]
    fn exhausted_backoff_keeps_polling_at_cap() {
        let policy = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(20)));
        for attempt in [3, 4, 50, u32::MAX] {
            assert_eq!(policy.next_delay(attempt), Some(Duration::from_millis(500)));
        }

        // the default policy never gives up on a key either
        let mut rng = StdRng::seed_from_u64(3);
        let delay = RetryConfig::default().next_delay_with_rng(1_000, &mut rng).unwrap();
        assert!(delay >= Duration::from_secs(30));
        assert!(delay <= Duration::from_millis(37_500));
    }

    #[test]
    fn retry_delay_without_jitter_is_exponential() {
        let policy = RetryConfig::new(5).with_backoff_multiplier(3.0).with_jitter(false);

        let delays: Vec<Duration> = (0..4).map(|round| policy.delay_for_attempt(round)).collect();
        assert_eq!(
            delays,
            [0, 100, 300, 900].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn retry_delay_with_jitter_is_bounded() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        let mut rng = StdRng::seed_from_u64(7);

        let delay = config.delay_with_rng(1, &mut rng);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn capped_delay_keeps_jitter_bound() {
        let policy = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);
        let mut rng = StdRng::seed_from_u64(42);

        let delay = policy.delay_with_rng(5, &mut rng);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250));
    }
}
