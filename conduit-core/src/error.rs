//! Error types for the Conduit runtime

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared, cloneable underlying cause
pub type Source = Arc<dyn StdError + Send + Sync>;

/// The main error type for all Conduit operations
///
/// Errors are cloneable so a single terminal failure can be re-raised to
/// every consumer of a stream.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed before any structured response was available
    Network {
        /// Error message
        message: String,
        /// Underlying error if available
        source: Option<Source>,
    },

    /// The remote endpoint answered with a well-formed error response
    Api {
        /// HTTP status code, if the error came from an HTTP response
        status: Option<u16>,
        /// Error message
        message: String,
        /// Raw response body, if it was readable
        body: Option<String>,
        /// Whether retrying the call may succeed
        retryable: bool,
        /// Time to wait before retrying, as announced by the server
        retry_after: Option<Duration>,
    },

    /// A buffered or streamed response could not be parsed
    Decode {
        /// Error message
        message: String,
        /// Underlying error if available
        source: Option<Source>,
    },

    /// Every attempt failed with a retryable error and the try budget ran out
    RetryExhausted {
        /// Every attempt's error, oldest first
        errors: Vec<Error>,
    },

    /// The caller's abort signal fired
    Abort,

    /// A value was pushed to a queue that is already closed or errored
    QueueClosed,

    /// Invalid configuration
    Configuration(String),

    /// A callback handed to the runtime panicked
    Internal(String),
}

impl Error {
    /// Create a transport error
    pub fn network(message: impl Into<String>) -> Self {
        Error::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error that wraps its cause
    pub fn network_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Network {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create an API error from an HTTP status code
    ///
    /// Rate limits (429) and server errors (5xx) are classified as retryable,
    /// every other status is not.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status: Some(status),
            message: message.into(),
            body: None,
            retryable: status == 429 || status >= 500,
            retry_after: None,
        }
    }

    /// Create an API error with an explicit retry classification
    pub fn api_classified(message: impl Into<String>, retryable: bool) -> Self {
        Error::Api {
            status: None,
            message: message.into(),
            body: None,
            retryable,
            retry_after: None,
        }
    }

    /// Attach the raw response body to an API error
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        if let Error::Api { body: slot, .. } = &mut self {
            *slot = Some(body.into());
        }
        self
    }

    /// Attach a server-provided retry delay to an API error
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let Error::Api { retry_after, .. } = &mut self {
            *retry_after = Some(delay);
        }
        self
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error that wraps its cause
    pub fn decode_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Decode {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Wrap the payload of a caught panic
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        Error::Internal(format!("panicked: {}", panic_message(payload)))
    }

    /// Whether this error represents a caller-initiated cancellation
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort)
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::Api { retryable, .. } => *retryable,
            Error::Decode { .. } => false,
            Error::RetryExhausted { .. } => false,
            Error::Abort => false,
            Error::QueueClosed => false,
            Error::Configuration(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Server-provided retry delay, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network { message, .. } => write!(f, "Network error: {}", message),
            Error::Api {
                status: Some(status),
                message,
                ..
            } => write!(f, "API call error (HTTP {}): {}", status, message),
            Error::Api { message, .. } => write!(f, "API call error: {}", message),
            Error::Decode { message, .. } => write!(f, "Decode error: {}", message),
            Error::RetryExhausted { errors } => match errors.last() {
                Some(last) => write!(
                    f,
                    "Failed after {} attempt(s), last error: {}",
                    errors.len(),
                    last
                ),
                None => write!(f, "Failed after {} attempt(s)", errors.len()),
            },
            Error::Abort => write!(f, "Operation aborted"),
            Error::QueueClosed => write!(
                f,
                "Cannot push to closed queue. The queue no longer accepts new items"
            ),
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Network { source, .. } | Error::Decode { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn StdError + 'static)),
            Error::RetryExhausted { errors } => {
                errors.last().map(|e| e as &(dyn StdError + 'static))
            }
            _ => None,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result type alias for Conduit operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Network {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    #[test]
    fn test_error_display() {
        let error = Error::network("Connection refused");
        assert_eq!(error.to_string(), "Network error: Connection refused");

        let error = Error::api(429, "Rate limit exceeded");
        assert_eq!(
            error.to_string(),
            "API call error (HTTP 429): Rate limit exceeded"
        );

        let error = Error::api_classified("Overloaded", true);
        assert_eq!(error.to_string(), "API call error: Overloaded");

        let error = Error::decode("Invalid JSON");
        assert_eq!(error.to_string(), "Decode error: Invalid JSON");

        let error = Error::RetryExhausted {
            errors: vec![Error::network("first"), Error::network("second")],
        };
        assert_eq!(
            error.to_string(),
            "Failed after 2 attempt(s), last error: Network error: second"
        );

        assert_eq!(Error::Abort.to_string(), "Operation aborted");

        let payload: Box<dyn Any + Send> = Box::new("process bug");
        let error = Error::panicked(payload.as_ref());
        assert_eq!(error.to_string(), "Internal error: panicked: process bug");
        assert!(!error.is_retryable());

        let error = Error::Configuration("max_attempts must be positive".into());
        assert_eq!(
            error.to_string(),
            "Configuration error: max_attempts must be positive"
        );
    }

    #[test]
    fn test_api_status_classification() {
        assert!(Error::api(429, "rate limited").is_retryable());
        assert!(Error::api(500, "internal").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::api(401, "unauthorized").is_retryable());
        assert!(!Error::api(404, "not found").is_retryable());
    }

    #[test]
    fn test_retryable_taxonomy() {
        assert!(Error::network("reset").is_retryable());
        assert!(!Error::decode("bad").is_retryable());
        assert!(!Error::Abort.is_retryable());
        assert!(!Error::QueueClosed.is_retryable());
        assert!(!Error::RetryExhausted { errors: vec![] }.is_retryable());
        assert!(Error::Abort.is_abort());
        assert!(!Error::network("reset").is_abort());
    }

    #[test]
    fn test_api_builders() {
        let error = Error::api(503, "busy")
            .with_body("{\"error\":\"busy\"}")
            .with_retry_after(Duration::from_secs(2));

        assert_eq!(error.status(), Some(503));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(2)));
        match error {
            Error::Api { body, .. } => assert_eq!(body.as_deref(), Some("{\"error\":\"busy\"}")),
            _ => panic!("Expected Api error"),
        }

        // Builders leave other variants untouched
        let error = Error::network("down").with_retry_after(Duration::from_secs(1));
        assert_eq!(error.retry_after(), None);
    }

    #[test]
    fn test_error_source() {
        let error = Error::network("Connection failed");
        assert!(error.source().is_none());

        let io_error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let error = Error::network_with_source("Connection failed", io_error);
        assert!(error.source().is_some());

        let json_error = serde_json::from_str::<String>("invalid").unwrap_err();
        let error = Error::decode_with_source("JSON parse error", json_error);
        assert!(error.source().is_some());

        let error = Error::RetryExhausted {
            errors: vec![Error::network("last")],
        };
        assert_eq!(error.source().unwrap().to_string(), "Network error: last");

        assert!(Error::Abort.source().is_none());
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "Connection reset");
        let error: Error = io_error.into();

        match error {
            Error::Network { message, source } => {
                assert!(message.contains("Connection reset"));
                assert!(source.is_some());
            }
            _ => panic!("Expected Network error"),
        }
    }

    #[test]
    fn test_error_from_serde_json_error() {
        let json_error = serde_json::from_str::<String>("invalid json").unwrap_err();
        let error: Error = json_error.into();

        match error {
            Error::Decode { message, source } => {
                assert!(!message.is_empty());
                assert!(source.is_some());
            }
            _ => panic!("Expected Decode error"),
        }
    }

    #[test]
    fn test_error_clone_keeps_source() {
        let io_error = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let error = Error::network_with_source("Request timed out", io_error);
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
        assert!(cloned.source().is_some());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
