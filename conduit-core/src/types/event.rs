//! Call lifecycle events

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Logical kind of a call (e.g. `generate-text`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FunctionType(Cow<'static, str>);

impl FunctionType {
    /// Text generation
    pub const GENERATE_TEXT: FunctionType = FunctionType(Cow::Borrowed("generate-text"));
    /// Streaming text generation
    pub const STREAM_TEXT: FunctionType = FunctionType(Cow::Borrowed("stream-text"));
    /// Structured output generation
    pub const GENERATE_STRUCTURE: FunctionType =
        FunctionType(Cow::Borrowed("generate-structure"));
    /// Streaming structured output generation
    pub const STREAM_STRUCTURE: FunctionType = FunctionType(Cow::Borrowed("stream-structure"));
    /// Embedding
    pub const EMBED: FunctionType = FunctionType(Cow::Borrowed("embed"));
    /// Image generation
    pub const GENERATE_IMAGE: FunctionType = FunctionType(Cow::Borrowed("generate-image"));
    /// Speech synthesis
    pub const GENERATE_SPEECH: FunctionType = FunctionType(Cow::Borrowed("generate-speech"));
    /// Transcription
    pub const GENERATE_TRANSCRIPTION: FunctionType =
        FunctionType(Cow::Borrowed("generate-transcription"));
    /// Tool execution
    pub const EXECUTE_TOOL: FunctionType = FunctionType(Cow::Borrowed("execute-tool"));

    /// Custom function type
    pub fn new(name: impl Into<String>) -> Self {
        FunctionType(Cow::Owned(name.into()))
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for FunctionType {
    fn from(name: &'static str) -> Self {
        FunctionType(Cow::Borrowed(name))
    }
}

/// Identity of the model or remote target a call talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInformation {
    /// Provider name (e.g. "openai")
    pub provider: String,
    /// Model name (e.g. "gpt-4o")
    pub model_name: String,
}

impl ModelInformation {
    /// Create model information
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
        }
    }
}

/// Generate a fresh call id
pub fn new_call_id() -> String {
    format!("call-{}", Uuid::new_v4())
}

/// Emitted once when a call begins
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStarted {
    /// Unique id of this invocation
    pub call_id: String,
    /// Id of the call that started this one, if nested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<String>,
    /// Run the call belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Session of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// User of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller-assigned function id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
    /// Logical kind of call
    pub function_type: FunctionType,
    /// Target model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInformation>,
    /// Description of the input
    pub input: Value,
    /// When the call started
    pub start_timestamp: DateTime<Utc>,
}

/// Final classification of a call
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallResult {
    /// The call produced its value
    Success {
        /// Serialized output, when the caller chose to record it
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    /// The call failed
    Error {
        /// Underlying cause
        #[serde(serialize_with = "serialize_error")]
        error: Error,
    },
    /// The caller cancelled the call
    Abort,
}

impl CallResult {
    /// Status label (`success`, `error` or `abort`)
    pub fn status(&self) -> &'static str {
        match self {
            CallResult::Success { .. } => "success",
            CallResult::Error { .. } => "error",
            CallResult::Abort => "abort",
        }
    }

    /// Classify the terminal outcome of an operation
    pub fn from_outcome<T>(outcome: &Result<T, Error>, output: Option<Value>) -> Self {
        match outcome {
            Ok(_) => CallResult::Success { output },
            Err(error) if error.is_abort() => CallResult::Abort,
            Err(error) => CallResult::Error {
                error: error.clone(),
            },
        }
    }
}

/// Emitted exactly once per [`CallStarted`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFinished {
    /// Identity copied from the started event
    #[serde(flatten)]
    pub call: CallStarted,
    /// When the call finished
    pub finish_timestamp: DateTime<Utc>,
    /// Time between start and finish
    #[serde(rename = "durationInMs", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    /// Outcome
    pub result: CallResult,
}

/// Discriminant of [`CallEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A call began
    Started,
    /// A call reached its terminal state
    Finished,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Started => f.write_str("started"),
            EventType::Finished => f.write_str("finished"),
        }
    }
}

/// Lifecycle event delivered to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum CallEvent {
    /// A call began
    Started(CallStarted),
    /// A call reached its terminal state
    Finished(CallFinished),
}

impl CallEvent {
    /// Id of the call
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::Started(event) => &event.call_id,
            CallEvent::Finished(event) => &event.call.call_id,
        }
    }

    /// Kind of the call
    pub fn function_type(&self) -> &FunctionType {
        match self {
            CallEvent::Started(event) => &event.function_type,
            CallEvent::Finished(event) => &event.call.function_type,
        }
    }

    /// Whether this is a started or finished event
    pub fn event_type(&self) -> EventType {
        match self {
            CallEvent::Started(_) => EventType::Started,
            CallEvent::Finished(_) => EventType::Finished,
        }
    }

    /// When the event happened
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CallEvent::Started(event) => event.start_timestamp,
            CallEvent::Finished(event) => event.finish_timestamp,
        }
    }

    /// Outcome, for finished events
    pub fn result(&self) -> Option<&CallResult> {
        match self {
            CallEvent::Started(_) => None,
            CallEvent::Finished(event) => Some(&event.result),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

fn serialize_duration_ms<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn started() -> CallStarted {
        CallStarted {
            call_id: "call-1".into(),
            parent_call_id: None,
            run_id: Some("run-1".into()),
            session_id: None,
            user_id: None,
            function_id: None,
            function_type: FunctionType::GENERATE_TEXT,
            model: Some(ModelInformation::new("openai", "gpt-4o")),
            input: json!("hello"),
            start_timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_call_id_format() {
        let first = new_call_id();
        let second = new_call_id();
        assert!(first.starts_with("call-"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_function_type_names() {
        assert_eq!(FunctionType::STREAM_TEXT.as_str(), "stream-text");
        assert_eq!(FunctionType::new("rerank").to_string(), "rerank");
        assert_eq!(FunctionType::from("embed"), FunctionType::EMBED);
    }

    #[test]
    fn test_started_event_serialization() {
        let event = CallEvent::Started(started());
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "eventType": "started",
                "callId": "call-1",
                "runId": "run-1",
                "functionType": "generate-text",
                "model": {"provider": "openai", "modelName": "gpt-4o"},
                "input": "hello",
                "startTimestamp": "2024-01-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn test_finished_event_serialization() {
        let event = CallEvent::Finished(CallFinished {
            call: started(),
            finish_timestamp: "2024-01-01T00:00:01Z".parse().unwrap(),
            duration: Duration::from_millis(1000),
            result: CallResult::Error {
                error: Error::network("reset"),
            },
        });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["eventType"], "finished");
        assert_eq!(value["durationInMs"], 1000);
        assert_eq!(value["result"]["status"], "error");
        assert_eq!(value["result"]["error"], "Network error: reset");
        assert_eq!(event.event_type(), EventType::Finished);
        assert_eq!(event.call_id(), "call-1");
        assert_eq!(event.result().map(CallResult::status), Some("error"));
    }

    #[test]
    fn test_result_classification() {
        let ok: Result<u8, Error> = Ok(1);
        assert_eq!(CallResult::from_outcome(&ok, None).status(), "success");

        let aborted: Result<u8, Error> = Err(Error::Abort);
        assert_eq!(CallResult::from_outcome(&aborted, None).status(), "abort");

        let failed: Result<u8, Error> = Err(Error::decode("bad"));
        assert_eq!(CallResult::from_outcome(&failed, None).status(), "error");
    }
}
