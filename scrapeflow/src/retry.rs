//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Fetch and extraction failures run under separate [`RetryConfig`]s; both
//! use [`with_retry`], which attempts an operation at most
//! `max_attempts` times and sleeps between attempts.

use crate::cancellation::CancellationToken;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
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
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// State tracking for retry operations.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: usize,
    /// Previous delays for decorrelated jitter.
    previous_delays: HashMap<String, u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Returns true if no attempts remain.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts >= config.max_attempts
    }

    /// Calculates the delay before the next attempt.
    ///
    /// The first retry uses the base delay.
    #[must_use]
    pub fn calculate_delay(&mut self, key: &str, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.attempts.saturating_sub(1);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u64.saturating_pow(u32::try_from(retry).unwrap_or(u32::MAX));
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Linear => {
                let factor = u64::try_from(retry + 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
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
                let prev = self.previous_delays.get(key).copied().unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let new_delay = if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delays.insert(key.to_string(), new_delay);
                new_delay
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry, waiting at least `after` when the server asked for it.
    Retry {
        /// Server-suggested minimum wait.
        after: Option<Duration>,
    },
    /// Give up immediately.
    Stop,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Makes a retry decision after a failed attempt.
#[must_use]
pub fn should_retry(
    state: &mut RetryState,
    config: &RetryConfig,
    key: &str,
    class: RetryClass,
) -> RetryDecision {
    let RetryClass::Retry { after } = class else {
        return RetryDecision::NotRetryable;
    };
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }

    let computed = state.calculate_delay(key, config);
    let delay = match after {
        Some(hint) => computed.max(hint.min(Duration::from_millis(config.max_delay_ms))),
        None => computed,
    };
    RetryDecision::Retry(delay)
}

/// Result of [`with_retry`] with the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: usize,
}

/// Executes an operation with retry logic.
///
/// `operation` receives the 1-based attempt number. `classify` decides
/// whether an error is retryable.
pub async fn with_retry<T, E, F, Fut, C>(
    config: &RetryConfig,
    key: &str,
    operation: F,
    classify: C,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    retry_loop(config, key, None, operation, classify).await
}

/// [`with_retry`] that stops waiting once `cancel` fires.
///
/// A cancellation during a backoff sleep returns the last error at once.
/// An attempt already running is awaited.
pub async fn with_retry_cancellable<T, E, F, Fut, C>(
    config: &RetryConfig,
    key: &str,
    cancel: &CancellationToken,
    operation: F,
    classify: C,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    retry_loop(config, key, Some(cancel), operation, classify).await
}

async fn retry_loop<T, E, F, Fut, C>(
    config: &RetryConfig,
    key: &str,
    cancel: Option<&CancellationToken>,
    mut operation: F,
    classify: C,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    let mut state = RetryState::new();

    loop {
        state.record_attempt();
        let e = match operation(state.attempts).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: state.attempts,
                }
            }
            Err(e) => e,
        };

        let RetryDecision::Retry(delay) = should_retry(&mut state, config, key, classify(&e)) else {
            return RetryOutcome {
                result: Err(e),
                attempts: state.attempts,
            };
        };
        tracing::debug!(
            key = %key,
            attempt = state.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %e,
            "Retrying after error"
        );

        match cancel {
            Some(cancel) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        tracing::debug!(key = %key, "Retry abandoned on cancellation");
                        return RetryOutcome {
                            result: Err(e),
                            attempts: state.attempts,
                        };
                    }
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}
