use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff as Growth;

use crate::config::BackoffConfig;

/// Wait-duration policy between retries of a failed flush.
///
/// Only the flush engine calls this, from a single task.
pub trait Backoff {
    /// Duration to wait before the next retry. Non-decreasing until `reset`.
    fn next_delay(&mut self) -> Duration;

    /// Return to the initial duration after a fully successful flush.
    fn reset(&mut self);
}

/// `min`, `min * factor`, `min * factor^2`, ... capped at `max`. No jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    factor: u32,
    growth: Growth,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let factor = config.factor.max(1);
        Self {
            min: config.min,
            max: config.max.max(config.min),
            factor,
            growth: Growth::from_millis(u64::from(factor)),
        }
    }

    /// `factor^n` for the n-th delay since the last reset, starting at `factor^0`.
    ///
    /// `tokio_retry`'s strategy built with `from_millis(factor)` yields
    /// `factor^1, factor^2, ...` as millisecond durations; those millis are the
    /// powers we want, shifted by one.
    fn next_multiplier(&mut self) -> u32 {
        let power = self.growth.next().map_or(u128::MAX, |d| d.as_millis());
        u32::try_from(power / u128::from(self.factor)).unwrap_or(u32::MAX)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let multiplier = self.next_multiplier();
        self.min.saturating_mul(multiplier).min(self.max)
    }

    fn reset(&mut self) {
        self.growth = Growth::from_millis(u64::from(self.factor));
    }
}
