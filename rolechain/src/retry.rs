//! Re-invocation policy for structured output.
//!
//! A structured stage that receives unusable text asks the model again, up to
//! `max_attempts` total invocations, sleeping between attempts. The default
//! waits a constant second with no jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for re-invocation on parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total invocations, including the first. Zero behaves like one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Same attempt budget, no waiting between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default().with_base_delay_ms(0)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Returns the attempt budget, never less than one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries already scheduled (0 before the first retry).
    pub retries: usize,
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the delay before the next retry and advances the counter.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.retries;
        self.retries += 1;

        let delay = match config.backoff {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => {
                let factor = u64::try_from(retry + 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delay_ms = Some(next);
                next
            }
        };

        Duration::from_millis(jittered)
    }
}
