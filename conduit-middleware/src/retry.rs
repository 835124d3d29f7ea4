//! Retry with exponential backoff for transient failures

use crate::throttle::ThrottlePolicy;
use conduit_core::{
    AbortPhase, AbortSignal, Error, ErrorClassifier, Result, RetryDecision, RetryOutcome,
};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Relative jitter; `0.2` spreads each delay uniformly over ±20%
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Check that the numeric parameters make sense
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Configuration(format!(
                "backoff_factor must be a finite number >= 1, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Configuration(format!(
                "jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Decides how often and how patiently an operation is re-run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Run exactly once
    pub fn none() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        }
    }

    /// Retry with exponentially growing delays
    pub fn exponential_backoff(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The policy's configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Attempt budget; zero is treated as one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (zero-based), without jitter
    ///
    /// Computed in floating point and clamped to `max_delay`, so large retry
    /// counts saturate instead of overflowing.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let max = self.config.max_delay.as_secs_f64();
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs >= max {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.config.max_delay)
    }

    /// Jittered delay before retry number `retry` (zero-based)
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        // NaN survives clamp; treat it as no jitter
        let jitter = if self.config.jitter.is_finite() {
            self.config.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    fn delay_after(&self, retry: u32, error: &Error) -> Duration {
        let delay = self.delay_for_attempt(retry);
        match error.retry_after() {
            Some(hint) => delay.max(hint.min(self.config.max_delay)),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts or is aborted
    ///
    /// The operation receives the one-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        abort: &AbortSignal,
        classifier: &dyn ErrorClassifier,
        operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_throttled(abort, classifier, &ThrottlePolicy::off(), operation)
            .await
    }

    /// Like [`RetryPolicy::run`], acquiring a throttle slot for every attempt
    ///
    /// The slot is held only while an attempt runs, never during backoff.
    pub async fn run_throttled<T, F, Fut>(
        &self,
        abort: &AbortSignal,
        classifier: &dyn ErrorClassifier,
        throttle: &ThrottlePolicy,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut errors = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if abort.is_aborted() {
                return RetryOutcome::Aborted {
                    phase: AbortPhase::Operation,
                    errors,
                };
            }

            let permit = match throttle.acquire(abort).await {
                Ok(permit) => permit,
                Err(error) if error.is_abort() => {
                    debug!(attempt, "Aborted while waiting for a throttle slot");
                    return RetryOutcome::Aborted {
                        phase: AbortPhase::Throttle,
                        errors,
                    };
                }
                Err(error) => {
                    errors.push(error.clone());
                    return RetryOutcome::NonRetryable { error, errors };
                }
            };

            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                result = operation(attempt) => Some(result),
            };
            drop(permit);

            let error = match result {
                Some(Ok(value)) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return RetryOutcome::Success(value);
                }
                Some(Err(error)) if !error.is_abort() && !abort.is_aborted() => error,
                _ => {
                    debug!(attempt, "Operation aborted");
                    return RetryOutcome::Aborted {
                        phase: AbortPhase::Operation,
                        errors,
                    };
                }
            };

            errors.push(error.clone());

            if classifier.classify(&error) == RetryDecision::DoNotRetry {
                debug!(attempt, error = %error, "Error is not retryable");
                return RetryOutcome::NonRetryable { error, errors };
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "Max retry attempts reached");
                return RetryOutcome::Exhausted { errors };
            }

            let delay = self.delay_after(attempt - 1, &error);
            warn!(
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    debug!(attempt, "Aborted during backoff");
                    return RetryOutcome::Aborted {
                        phase: AbortPhase::Backoff,
                        errors,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential_backoff(RetryConfig::default())
    }
}
