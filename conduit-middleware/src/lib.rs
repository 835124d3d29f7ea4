//! Policies wrapped around every call
//!
//! [`RetryPolicy`] re-runs failed attempts with exponential backoff,
//! [`ThrottlePolicy`] bounds how many attempts run at once, and the
//! [`logging`] and [`cache`] modules provide ready-made observers and a
//! result cache.

#![warn(missing_docs)]

pub mod cache;
pub mod logging;
pub mod retry;
pub mod throttle;

pub use cache::{CacheKey, CallCache, MemoryCache};
pub use logging::FunctionLogging;
pub use retry::{RetryConfig, RetryPolicy};
pub use throttle::{ThrottlePermit, ThrottlePolicy};
