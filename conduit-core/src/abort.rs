//! Cooperative cancellation shared by every suspension point

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Read side of a cancellation signal
///
/// Cloning is cheap; every clone observes the same controller. The default
/// signal never fires.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Option<Arc<AbortInner>>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { inner: None }
    }

    /// Whether the controller has fired
    pub fn is_aborted(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.aborted.load(Ordering::SeqCst))
    }

    /// Fail with [`Error::Abort`] if the signal has fired
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Abort)
        } else {
            Ok(())
        }
    }

    /// Resolve once the signal fires
    ///
    /// Resolves immediately when the signal already fired. For a signal that
    /// can never fire the future stays pending forever.
    pub async fn cancelled(&self) {
        let Some(inner) = &self.inner else {
            return std::future::pending().await;
        };

        let notified = inner.notify.notified();
        tokio::pin!(notified);
        // Register before reading the flag so a concurrent abort cannot slip
        // between the check and the wait.
        notified.as_mut().enable();

        if inner.aborted.load(Ordering::SeqCst) {
            return;
        }

        notified.await;
    }

    /// Owned variant of [`AbortSignal::cancelled`] for storing in poll-based types
    pub fn cancelled_owned(&self) -> impl Future<Output = ()> + Send + 'static {
        let signal = self.clone();
        async move { signal.cancelled().await }
    }

    /// Whether this signal is connected to a controller
    pub fn can_abort(&self) -> bool {
        self.inner.is_some()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Write side of a cancellation signal
#[derive(Debug)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a controller that has not fired yet
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                inner: Some(Arc::new(AbortInner {
                    aborted: AtomicBool::new(false),
                    notify: Notify::new(),
                })),
            },
        }
    }

    /// Signal handed to operations
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Whether [`AbortController::abort`] has been called
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Fire the signal; later calls have no effect
    pub fn abort(&self) {
        if let Some(inner) = &self.signal.inner {
            if !inner.aborted.swap(true, Ordering::SeqCst) {
                debug!("Abort signal fired");
                inner.notify.notify_waiters();
            }
        }
    }

    /// Fire the signal after `delay`
    ///
    /// This is how deadlines are expressed: a timer that fires the same
    /// signal. Must be called from within a tokio runtime.
    pub fn abort_after(&self, delay: Duration) -> JoinHandle<()> {
        let signal = self.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = &signal.inner {
                if !inner.aborted.swap(true, Ordering::SeqCst) {
                    debug!(delay_ms = delay.as_millis(), "Deadline reached, aborting");
                    inner.notify.notify_waiters();
                }
            }
        })
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
