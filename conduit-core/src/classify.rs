//! Retry classification of failed attempts

use crate::error::Error;

/// Verdict for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure, another attempt may succeed
    Retry,
    /// Permanent failure, surface it immediately
    DoNotRetry,
}

/// Decides whether a failed attempt is worth retrying
///
/// Cancellation is not the classifier's concern: the retry loop treats a
/// fired abort signal or an [`Error::Abort`] as an abort regardless of what
/// the classifier answers.
pub trait ErrorClassifier: Send + Sync {
    /// Classify a failed attempt
    fn classify(&self, error: &Error) -> RetryDecision;
}

/// Classification based on the error taxonomy
///
/// Transport errors and API errors flagged retryable (rate limits, server
/// errors) are retried; everything else is not.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &Error) -> RetryDecision {
        if error.is_retryable() {
            RetryDecision::Retry
        } else {
            RetryDecision::DoNotRetry
        }
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&Error) -> RetryDecision + Send + Sync,
{
    fn classify(&self, error: &Error) -> RetryDecision {
        self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classifier() {
        let classifier = DefaultClassifier;
        assert_eq!(
            classifier.classify(&Error::network("reset")),
            RetryDecision::Retry
        );
        assert_eq!(
            classifier.classify(&Error::api(503, "unavailable")),
            RetryDecision::Retry
        );
        assert_eq!(
            classifier.classify(&Error::api(422, "invalid")),
            RetryDecision::DoNotRetry
        );
        assert_eq!(
            classifier.classify(&Error::decode("truncated")),
            RetryDecision::DoNotRetry
        );
    }

    #[test]
    fn test_closure_classifier() {
        let retry_everything = |_: &Error| RetryDecision::Retry;
        assert_eq!(
            retry_everything.classify(&Error::decode("x")),
            RetryDecision::Retry
        );
    }
}
