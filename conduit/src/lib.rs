//! Conduit - resilient execution of remote calls
//!
//! This crate bundles the Conduit runtime behind one dependency:
//!
//! - **Retries**: exponential backoff with jitter and `Retry-After` hints
//! - **Throttling**: bounded concurrency with FIFO waiters
//! - **Streaming**: event-framed and growing-document decoders feeding an
//!   async queue that any number of readers can consume
//! - **Observability**: `started`/`finished` events for every call, with
//!   ready-made loggers
//! - **Cancellation**: one abort signal honored at every suspension point
//!
//! # Quick Start
//!
//! ```
//! # #[cfg(feature = "client")]
//! # {
//! use conduit::prelude::*;
//! use conduit::middleware::{RetryConfig, RetryPolicy};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let executor = CallExecutor::builder()
//!     .retry(RetryPolicy::exponential_backoff(RetryConfig::default()))
//!     .build()?;
//!
//! let answer = executor
//!     .execute(
//!         CallDescriptor::new(FunctionType::GENERATE_TEXT),
//!         CallOptions::new(),
//!         |_ctx| async { Ok(42) },
//!     )
//!     .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Re-export core types
pub use conduit_core::*;

#[cfg(feature = "stream")]
#[cfg_attr(docsrs, doc(cfg(feature = "stream")))]
pub mod stream {
    //! Async queue, stream decoders and HTTP transport
    pub use conduit_stream::*;
}

#[cfg(feature = "middleware")]
#[cfg_attr(docsrs, doc(cfg(feature = "middleware")))]
pub mod middleware {
    //! Retry, throttling, call logging and caching
    pub use conduit_middleware::*;
}

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client {
    //! Call executor and global observer registry
    pub use conduit_client::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use conduit_core::{
        AbortController, AbortSignal, CallEvent, Delta, Error, FunctionType, Result,
    };

    #[cfg(feature = "client")]
    pub use conduit_client::{CallDescriptor, CallExecutor, CallOptions, Run};

    #[cfg(feature = "stream")]
    pub use conduit_stream::{AsyncQueue, DocumentParse};
}
