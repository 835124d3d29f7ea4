//! Concurrency gate for call attempts

use conduit_core::{AbortSignal, Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Limits how many operations run at once
///
/// Waiters are served in FIFO order. A limit of zero is treated as no limit.
#[derive(Debug, Clone, Default)]
pub struct ThrottlePolicy {
    semaphore: Option<Arc<Semaphore>>,
    limit: usize,
}

/// A held concurrency slot, released on drop
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ThrottlePolicy {
    /// Never block
    pub fn off() -> Self {
        Self {
            semaphore: None,
            limit: 0,
        }
    }

    /// Allow at most `limit` operations in flight
    pub fn max_concurrency(limit: usize) -> Self {
        if limit == 0 {
            return Self::off();
        }
        Self {
            semaphore: Some(Arc::new(Semaphore::new(limit))),
            limit,
        }
    }

    /// Configured limit, `None` when unlimited
    pub fn limit(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|_| self.limit)
    }

    /// Free slots, `None` when unlimited
    pub fn available_slots(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a slot
    ///
    /// Gives up with [`Error::Abort`] when the signal fires first.
    pub async fn acquire(&self, abort: &AbortSignal) -> Result<ThrottlePermit> {
        abort.check()?;

        let Some(semaphore) = &self.semaphore else {
            return Ok(ThrottlePermit { _permit: None });
        };

        if semaphore.available_permits() == 0 {
            debug!(limit = self.limit, "Waiting for a throttle slot");
        }

        let permit = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(Error::Abort),
            permit = Arc::clone(semaphore).acquire_owned() => permit
                .map_err(|_| Error::Configuration("throttle semaphore closed".into()))?,
        };

        trace!(available = semaphore.available_permits(), "Throttle slot acquired");
        Ok(ThrottlePermit {
            _permit: Some(permit),
        })
    }

    /// Run `operation` while holding a slot
    ///
    /// The slot is released when the operation finishes, fails, is aborted
    /// or panics.
    pub async fn run<T, F, Fut>(&self, abort: &AbortSignal, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.acquire(abort).await?;

        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(Error::Abort),
            result = operation() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::AbortController;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_off_never_blocks() {
        let throttle = ThrottlePolicy::off();
        assert_eq!(throttle.limit(), None);
        assert_eq!(throttle.available_slots(), None);

        let held = throttle.acquire(&AbortSignal::never()).await.unwrap();
        let value = throttle
            .run(&AbortSignal::never(), || async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        drop(held);
    }

    #[tokio::test]
    async fn test_zero_limit_is_unlimited() {
        assert_eq!(ThrottlePolicy::max_concurrency(0).limit(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_serializes_bodies() {
        let throttle = ThrottlePolicy::max_concurrency(1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let throttle = throttle.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                throttle
                    .run(&AbortSignal::never(), move || async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(throttle.available_slots(), Some(1));
    }

    #[tokio::test]
    async fn test_slot_released_on_error() {
        let throttle = ThrottlePolicy::max_concurrency(1);
        let result: Result<()> = throttle
            .run(&AbortSignal::never(), || async { Err(Error::network("reset")) })
            .await;

        assert!(result.is_err());
        assert_eq!(throttle.available_slots(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gives_up_on_abort() {
        let throttle = ThrottlePolicy::max_concurrency(1);
        let held = throttle.acquire(&AbortSignal::never()).await.unwrap();

        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.run(&signal, || async { Ok(()) }).await })
        };

        sleep(Duration::from_millis(20)).await;
        controller.abort();

        assert!(waiter.await.unwrap().unwrap_err().is_abort());
        assert_eq!(throttle.available_slots(), Some(0));
        drop(held);
        assert_eq!(throttle.available_slots(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_released_when_running_operation_is_aborted() {
        let throttle = ThrottlePolicy::max_concurrency(1);
        let controller = AbortController::new();
        let _timer = controller.abort_after(Duration::from_millis(30));

        let result: Result<()> = throttle
            .run(&controller.signal(), || async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_abort());
        assert_eq!(throttle.available_slots(), Some(1));
    }

    async fn explode() -> Result<()> {
        panic!("operation bug")
    }

    #[tokio::test]
    async fn test_slot_released_on_panic() {
        let throttle = ThrottlePolicy::max_concurrency(1);
        let task = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.run(&AbortSignal::never(), explode).await })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(throttle.available_slots(), Some(1));
    }
}
