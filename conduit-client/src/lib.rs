//! Call execution for the Conduit runtime
//!
//! [`CallExecutor`] runs an operation as one observed call: it emits the
//! `started`/`finished` lifecycle events, applies the retry and throttle
//! policies, optionally consults a cache, and for streaming calls decodes
//! the response body into an [`AsyncQueueReader`](conduit_stream::AsyncQueueReader).

#![warn(missing_docs)]

mod context;
mod executor;
pub mod registry;
mod stream;

pub use context::{CallContext, CallDescriptor, CallOptions, CallResponse, Run};
pub use executor::{CallExecutor, CallExecutorBuilder};
pub use stream::{StreamProcessor, StreamResponse};
pub use registry::{
    global_logging, global_observers, register_global_observer, reset_global_registry,
    set_global_logging,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::{CallDescriptor, CallExecutor, CallOptions, Run, StreamProcessor};
    pub use conduit_core::{AbortController, AbortSignal, Error, FunctionType, Result};
}
