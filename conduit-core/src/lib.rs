//! Core types for the Conduit call-execution runtime
//!
//! This crate holds the vocabulary shared by every other crate in the
//! workspace: the error taxonomy, streaming deltas, the abort signal, call
//! lifecycle events and the observer/classifier seams.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod abort;
pub mod classify;
pub mod error;
pub mod observer;
pub mod types;

// Re-export commonly used items
pub use abort::{AbortController, AbortSignal};
pub use classify::{DefaultClassifier, ErrorClassifier, RetryDecision};
pub use error::{Error, Result};
pub use observer::{
    ErrorHandler, FunctionEventSource, FunctionObserver, ObserverError, ObserverRef,
};
pub use types::{
    delta::Delta,
    event::{
        new_call_id, CallEvent, CallFinished, CallResult, CallStarted, EventType, FunctionType,
        ModelInformation,
    },
    outcome::{AbortPhase, RetryOutcome},
};
