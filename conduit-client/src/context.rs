//! Per-call inputs and outputs of the executor

use chrono::{DateTime, Utc};
use conduit_core::{
    AbortSignal, ErrorHandler, FunctionType, ModelInformation, ObserverRef,
};
use conduit_middleware::FunctionLogging;
use serde_json::Value;
use std::time::Duration;

/// What is being called
///
/// # Examples
///
/// ```
/// use conduit_client::CallDescriptor;
/// use conduit_core::{FunctionType, ModelInformation};
/// use serde_json::json;
///
/// let descriptor = CallDescriptor::new(FunctionType::EMBED)
///     .model(ModelInformation::new("openai", "text-embedding-3-small"))
///     .input(json!({"values": ["hello"]}));
/// assert_eq!(descriptor.function_type.as_str(), "embed");
/// ```
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Logical kind of call
    pub function_type: FunctionType,
    /// Target model
    pub model: Option<ModelInformation>,
    /// Description of the input, recorded on events and used for cache keys
    pub input: Value,
    /// Caller-assigned function id
    pub function_id: Option<String>,
}

impl CallDescriptor {
    /// Describe a call of the given kind with no input
    pub fn new(function_type: impl Into<FunctionType>) -> Self {
        Self {
            function_type: function_type.into(),
            model: None,
            input: Value::Null,
            function_id: None,
        }
    }

    /// Set the target model
    pub fn model(mut self, model: ModelInformation) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the input description
    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the function id
    pub fn function_id(mut self, id: impl Into<String>) -> Self {
        self.function_id = Some(id.into());
        self
    }
}

/// A group of related calls sharing identity and an observer
#[derive(Clone, Default)]
pub struct Run {
    /// Run id
    pub run_id: Option<String>,
    /// Session the run belongs to
    pub session_id: Option<String>,
    /// User the run belongs to
    pub user_id: Option<String>,
    /// Observer notified about every call of the run
    pub observer: Option<ObserverRef>,
    /// Handler for failures of any observer during the run's calls
    pub error_handler: Option<ErrorHandler>,
}

impl Run {
    /// Create a run with an id
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    /// Set the session id
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the user id
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Set the run observer
    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the observer error handler
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// Caller-supplied context for a single call
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Cancellation signal
    pub abort: AbortSignal,
    /// Observers for this call only
    pub observers: Vec<ObserverRef>,
    /// Logging mode overriding the executor and global defaults
    pub logging: Option<FunctionLogging>,
    /// Run the call belongs to
    pub run: Option<Run>,
    /// Id of the call that started this one
    pub parent_call_id: Option<String>,
    /// Function id overriding the descriptor's
    pub function_id: Option<String>,
}

impl CallOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the abort signal
    pub fn abort(mut self, signal: AbortSignal) -> Self {
        self.abort = signal;
        self
    }

    /// Add a per-call observer
    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.observers.push(observer);
        self
    }

    /// Override the logging mode
    pub fn logging(mut self, logging: FunctionLogging) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Attach the call to a run
    pub fn run(mut self, run: Run) -> Self {
        self.run = Some(run);
        self
    }

    /// Mark the call as nested inside another call
    pub fn parent_call_id(mut self, id: impl Into<String>) -> Self {
        self.parent_call_id = Some(id.into());
        self
    }

    /// Override the function id
    pub fn function_id(mut self, id: impl Into<String>) -> Self {
        self.function_id = Some(id.into());
        self
    }
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("abort", &self.abort)
            .field("observers", &self.observers.len())
            .field("logging", &self.logging)
            .field("run", &self.run)
            .field("parent_call_id", &self.parent_call_id)
            .field("function_id", &self.function_id)
            .finish()
    }
}

/// Handed to every attempt of an operation
///
/// Operations that start nested calls should pass [`CallContext::call_id`]
/// on as the nested call's parent id.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Id of the running call
    pub call_id: String,
    /// One-based attempt number
    pub attempt: u32,
    /// Cancellation signal of the call
    pub abort: AbortSignal,
    /// Run the call belongs to
    pub run_id: Option<String>,
}

impl CallContext {
    /// Options for a call nested inside this one
    pub fn nested_options(&self) -> CallOptions {
        CallOptions::new()
            .abort(self.abort.clone())
            .parent_call_id(self.call_id.clone())
    }
}

/// Value of a call together with its metadata
#[derive(Debug, Clone)]
pub struct CallResponse<T> {
    /// The call's value
    pub value: T,
    /// Id of the call
    pub call_id: String,
    /// When the call started
    pub start_timestamp: DateTime<Utc>,
    /// When the call finished
    pub finish_timestamp: DateTime<Utc>,
    /// Time between start and finish
    pub duration: Duration,
}
