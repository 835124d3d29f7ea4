//! Result of a retry-wrapped operation

use crate::error::Error;
use std::fmt;

/// Where an abort was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortPhase {
    /// While an attempt was running
    Operation,
    /// While sleeping between attempts
    Backoff,
    /// While waiting for a concurrency slot
    Throttle,
}

impl fmt::Display for AbortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortPhase::Operation => f.write_str("operation"),
            AbortPhase::Backoff => f.write_str("backoff"),
            AbortPhase::Throttle => f.write_str("throttle"),
        }
    }
}

/// Outcome of running an operation under a retry policy
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded
    Success(T),
    /// Every attempt failed retryably and the try budget ran out
    Exhausted {
        /// Every attempt's error, oldest first
        errors: Vec<Error>,
    },
    /// An attempt failed with an error not worth retrying
    NonRetryable {
        /// The error that stopped the loop
        error: Error,
        /// Every attempt's error, oldest first (the last one is `error`)
        errors: Vec<Error>,
    },
    /// The abort signal fired
    Aborted {
        /// Where the abort was observed
        phase: AbortPhase,
        /// Errors of the attempts that completed before the abort
        errors: Vec<Error>,
    },
}

impl<T> RetryOutcome<T> {
    /// Whether an attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }

    /// Whether the abort signal ended the loop
    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryOutcome::Aborted { .. })
    }

    /// Errors recorded across attempts, oldest first
    pub fn errors(&self) -> &[Error] {
        match self {
            RetryOutcome::Success(_) => &[],
            RetryOutcome::Exhausted { errors }
            | RetryOutcome::NonRetryable { errors, .. }
            | RetryOutcome::Aborted { errors, .. } => errors,
        }
    }

    /// Collapse into the single terminal classification callers see
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { errors } => Err(Error::RetryExhausted { errors }),
            RetryOutcome::NonRetryable { error, .. } => Err(error),
            RetryOutcome::Aborted { .. } => Err(Error::Abort),
        }
    }
}
