//! Exponential backoff with jitter, used to retry transient remote failures.

use std::{num::NonZeroU32, time::Duration};

use rand::Rng;

/// Exponential backoff with jitter
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,

    /// Maximum backoff.
    pub max_backoff: Duration,

    /// Multiplier for each backoff round.
    pub base: f64,

    /// Number of retries before giving up, `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 3.,
            max_attempts: NonZeroU32::new(10),
        }
    }
}

/// State of one retry sequence, created fresh for each operation being retried.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        let base = if config.base.is_finite() && config.base >= 1. {
            config.base
        } else {
            1.
        };

        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base,
            attempts: 0,
            max_attempts: config.max_attempts.map(NonZeroU32::get),
        }
    }

    /// Number of backoffs handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the duration to wait before the next attempt, or `None` once the configured number
    /// of attempts has been used up.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        self.attempts += 1;

        let upper = (self.next_backoff_secs * self.base).min(self.max_backoff_secs);
        let rand_backoff = if upper > self.init_backoff {
            rand::thread_rng().gen_range(self.init_backoff..upper)
        } else {
            self.init_backoff
        };
        let next_backoff = self.max_backoff_secs.min(rand_backoff);

        Some(Duration::from_secs_f64(std::mem::replace(
            &mut self.next_backoff_secs,
            next_backoff,
        )))
    }
}
