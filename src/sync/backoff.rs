//! Retry delay for the sync loop.

use std::time::Duration;

/// Upper bound for any retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Capped exponential backoff with ±12.5% jitter.
///
/// Each failure doubles the delay starting from `base`, up to
/// [`MAX_RETRY_DELAY`]. [`Backoff::reset`] returns to `base` after a
/// successful tick.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// Backoff starting at `base` and capped at [`MAX_RETRY_DELAY`].
    #[must_use]
    pub fn new(base: Duration) -> Self {
        Self::with_max(base, MAX_RETRY_DELAY)
    }

    /// Backoff with an explicit cap.
    #[must_use]
    pub fn with_max(base: Duration, max: Duration) -> Self {
        Self {
            base: base.min(max),
            max,
            failures: 0,
        }
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next attempt without jitter.
    #[must_use]
    pub fn current(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Record a failure and return the jittered delay to wait.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.failures = self.failures.saturating_add(1);

        // ±12.5%
        let jitter_factor = 0.25 * (rand::random::<f64>() - 0.5);
        let jitter_ms = (delay.as_millis() as f64 * jitter_factor).round() as i64;
        let jittered = if jitter_ms >= 0 {
            delay + Duration::from_millis(jitter_ms.unsigned_abs())
        } else {
            delay.saturating_sub(Duration::from_millis(jitter_ms.unsigned_abs()))
        };

        jittered.min(self.max)
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
