//! Observer notification for call lifecycle events

use crate::error::panic_message;
use crate::types::event::CallEvent;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Failure reported by (or caught around) an observer
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// The observer returned an error
    #[error("Observer failed: {0}")]
    Failed(String),

    /// The observer panicked while handling an event
    #[error("Observer panicked: {0}")]
    Panicked(String),
}

impl ObserverError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Receives `started`/`finished` events
///
/// Observers run inline on the task that drives the call, so they should
/// return quickly. Failures never reach the caller of the call.
pub trait FunctionObserver: Send + Sync {
    /// Handle one event
    fn on_function_event(&self, event: &CallEvent) -> Result<(), ObserverError>;
}

impl<F> FunctionObserver for F
where
    F: Fn(&CallEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_function_event(&self, event: &CallEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Shared observer handle
pub type ObserverRef = Arc<dyn FunctionObserver>;

/// Side channel for observer failures
#[derive(Clone)]
pub struct ErrorHandler {
    handler: Arc<dyn Fn(&ObserverError) + Send + Sync>,
}

impl ErrorHandler {
    /// Route observer failures to a custom handler
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ObserverError) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Log observer failures as warnings
    pub fn logging() -> Self {
        Self::new(|error| warn!(error = %error, "Function observer failed"))
    }

    /// Report one failure
    pub fn handle(&self, error: &ObserverError) {
        (self.handler)(error)
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::logging()
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler").finish_non_exhaustive()
    }
}

/// Fans events out to a fixed list of observers
#[derive(Clone, Default)]
pub struct FunctionEventSource {
    observers: Vec<ObserverRef>,
    error_handler: ErrorHandler,
}

impl FunctionEventSource {
    /// Create an event source
    pub fn new(observers: Vec<ObserverRef>, error_handler: ErrorHandler) -> Self {
        Self {
            observers,
            error_handler,
        }
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether there are no observers
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver an event to every observer
    ///
    /// A failing or panicking observer does not prevent later observers from
    /// being notified.
    pub fn notify(&self, event: &CallEvent) {
        for observer in &self.observers {
            let failure = match catch_unwind(AssertUnwindSafe(|| {
                observer.on_function_event(event)
            })) {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error),
                Err(payload) => Some(ObserverError::Panicked(panic_message(payload.as_ref()))),
            };

            if let Some(error) = failure {
                let handler = &self.error_handler;
                if catch_unwind(AssertUnwindSafe(|| handler.handle(&error))).is_err() {
                    warn!(error = %error, "Observer error handler panicked");
                }
            }
        }
    }
}

impl fmt::Debug for FunctionEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEventSource")
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{new_call_id, CallStarted, FunctionType};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn started_event() -> CallEvent {
        CallEvent::Started(CallStarted {
            call_id: new_call_id(),
            parent_call_id: None,
            run_id: None,
            session_id: None,
            user_id: None,
            function_id: None,
            function_type: FunctionType::EMBED,
            model: None,
            input: serde_json::Value::Null,
            start_timestamp: Utc::now(),
        })
    }

    fn counting_observer(counter: Arc<AtomicUsize>) -> ObserverRef {
        Arc::new(move |_: &CallEvent| -> Result<(), ObserverError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_notify_all_observers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let source = FunctionEventSource::new(
            vec![
                counting_observer(counter.clone()),
                counting_observer(counter.clone()),
            ],
            ErrorHandler::default(),
        );

        source.notify(&started_event());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_failing_observer_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(Mutex::new(Vec::new()));

        let failing: ObserverRef = Arc::new(|_: &CallEvent| -> Result<(), ObserverError> {
            Err(ObserverError::failed("sink offline"))
        });
        let panicking: ObserverRef = Arc::new(|_: &CallEvent| -> Result<(), ObserverError> {
            panic!("observer bug")
        });

        let sink = reported.clone();
        let source = FunctionEventSource::new(
            vec![failing, panicking, counting_observer(counter.clone())],
            ErrorHandler::new(move |error| sink.lock().unwrap().push(error.to_string())),
        );

        source.notify(&started_event());

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let reported = reported.lock().unwrap();
        assert_eq!(
            *reported,
            vec![
                "Observer failed: sink offline".to_string(),
                "Observer panicked: observer bug".to_string(),
            ]
        );
    }

    #[traced_test]
    #[test]
    fn test_default_handler_logs_failures() {
        let failing: ObserverRef = Arc::new(|_: &CallEvent| -> Result<(), ObserverError> {
            Err(ObserverError::failed("boom"))
        });
        let source = FunctionEventSource::new(vec![failing], ErrorHandler::default());

        source.notify(&started_event());

        assert!(logs_contain("Function observer failed"));
    }
}
