//! Function-call loggers

use chrono::SecondsFormat;
use conduit_core::{CallEvent, FunctionObserver, ObserverError, ObserverRef};
use std::sync::Arc;
use tracing::{debug, info};

/// How call lifecycle events are written to the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FunctionLogging {
    /// No logging
    #[default]
    Off,
    /// One `info` line per event
    BasicText,
    /// The full event in single-line `Debug` form, at `debug` level
    DetailedObject,
    /// The full event serialized as JSON, at `info` level
    DetailedJson,
}

impl FunctionLogging {
    /// Observer implementing this mode, `None` when logging is off
    pub fn observer(self) -> Option<ObserverRef> {
        match self {
            FunctionLogging::Off => None,
            mode => Some(Arc::new(CallLogger { mode })),
        }
    }
}

/// Observer that writes events through `tracing`
#[derive(Debug, Clone, Copy)]
struct CallLogger {
    mode: FunctionLogging,
}

impl FunctionObserver for CallLogger {
    fn on_function_event(&self, event: &CallEvent) -> Result<(), ObserverError> {
        match self.mode {
            FunctionLogging::Off => {}
            FunctionLogging::BasicText => {
                info!(call_id = event.call_id(), "{}", basic_text(event));
            }
            FunctionLogging::DetailedObject => {
                debug!(call_id = event.call_id(), event = ?event, "Function event");
            }
            FunctionLogging::DetailedJson => {
                let json = serde_json::to_string(event)
                    .map_err(|e| ObserverError::failed(format!("event serialization: {e}")))?;
                info!(call_id = event.call_id(), "{}", json);
            }
        }
        Ok(())
    }
}

/// `[timestamp] call-id - function-type event-type`, with the duration
/// appended for finished events
pub fn basic_text(event: &CallEvent) -> String {
    let timestamp = event.timestamp().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut line = format!(
        "[{}] {} - {} {}",
        timestamp,
        event.call_id(),
        event.function_type(),
        event.event_type()
    );

    if let CallEvent::Finished(finished) = event {
        line.push_str(&format!(" in {}ms", finished.duration.as_millis()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use conduit_core::{CallFinished, CallResult, CallStarted, FunctionType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn started() -> CallStarted {
        CallStarted {
            call_id: "call-1".to_string(),
            parent_call_id: None,
            run_id: None,
            session_id: None,
            user_id: None,
            function_id: None,
            function_type: FunctionType::GENERATE_TEXT,
            model: None,
            input: json!({"prompt": "hi"}),
            start_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn finished() -> CallEvent {
        let call = started();
        CallEvent::Finished(CallFinished {
            finish_timestamp: call.start_timestamp + chrono::Duration::milliseconds(42),
            call,
            duration: Duration::from_millis(42),
            result: CallResult::Success { output: None },
        })
    }

    #[test]
    fn test_off_has_no_observer() {
        assert!(FunctionLogging::Off.observer().is_none());
        assert!(FunctionLogging::BasicText.observer().is_some());
        assert_eq!(FunctionLogging::default(), FunctionLogging::Off);
    }

    #[test]
    fn test_basic_text_format() {
        assert_eq!(
            basic_text(&CallEvent::Started(started())),
            "[2024-05-01T12:00:00.000Z] call-1 - generate-text started"
        );
        assert_eq!(
            basic_text(&finished()),
            "[2024-05-01T12:00:00.042Z] call-1 - generate-text finished in 42ms"
        );
    }

    #[traced_test]
    #[test]
    fn test_basic_text_logs_events() {
        let observer = FunctionLogging::BasicText.observer().unwrap();
        observer.on_function_event(&finished()).unwrap();
        assert!(logs_contain("call-1 - generate-text finished in 42ms"));
    }

    #[traced_test]
    #[test]
    fn test_detailed_json_logs_serialized_event() {
        let observer = FunctionLogging::DetailedJson.observer().unwrap();
        observer.on_function_event(&finished()).unwrap();
        assert!(logs_contain(r#""eventType":"finished""#));
        assert!(logs_contain(r#""durationInMs":42"#));
    }

    #[traced_test]
    #[test]
    fn test_detailed_object_logs_debug_form() {
        let observer = FunctionLogging::DetailedObject.observer().unwrap();
        observer
            .on_function_event(&CallEvent::Started(started()))
            .unwrap();
        assert!(logs_contain("Function event"));
        assert!(logs_contain(r#"event=Started(CallStarted { call_id: "call-1""#));
    }
}
