//! Push-to-pull bridge between a producer task and stream consumers

use conduit_core::{AbortSignal, Error, Result};
use futures_core::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::trace;

/// Lifecycle of an [`AsyncQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Accepting values
    Open,
    /// No more values will be pushed; readers drain what is buffered
    Closed,
    /// Terminally failed; readers observe the error
    Errored,
}

enum Terminal {
    Open,
    Closed,
    Errored(Error),
}

struct Shared<T> {
    values: Vec<T>,
    terminal: Terminal,
    wakers: HashMap<u64, Waker>,
    next_reader: u64,
}

impl<T> Shared<T> {
    fn state(&self) -> QueueState {
        match self.terminal {
            Terminal::Open => QueueState::Open,
            Terminal::Closed => QueueState::Closed,
            Terminal::Errored(_) => QueueState::Errored,
        }
    }

    fn wake_all(&mut self) {
        for (_, waker) in self.wakers.drain() {
            waker.wake();
        }
    }
}

/// Multi-producer, multi-reader queue
///
/// Every reader has its own cursor that starts at the first value ever
/// pushed, so each reader sees the full sequence in push order exactly once,
/// regardless of when it was created.
pub struct AsyncQueue<T> {
    shared: Arc<Mutex<Shared<T>>>,
    abort: AbortSignal,
}

impl<T> AsyncQueue<T> {
    /// Create an open queue
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                values: Vec::new(),
                terminal: Terminal::Open,
                wakers: HashMap::new(),
                next_reader: 0,
            })),
            abort: AbortSignal::never(),
        }
    }

    /// Create an open queue that fails with [`Error::Abort`] once `signal` fires
    pub fn with_abort(signal: AbortSignal) -> Self {
        let mut queue = Self::new();
        queue.abort = signal;
        queue
    }

    /// Append a value
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed or errored.
    pub fn push(&self, value: T) -> Result<()> {
        if self.abort.is_aborted() {
            self.fail(Error::Abort);
        }

        let mut shared = self.shared.lock();
        if !matches!(shared.terminal, Terminal::Open) {
            return Err(Error::QueueClosed);
        }

        shared.values.push(value);
        trace!(len = shared.values.len(), "Value pushed to queue");
        shared.wake_all();
        Ok(())
    }

    /// Stop accepting values; readers drain the buffer and then end
    ///
    /// Has no effect on a queue that is already terminal.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        if matches!(shared.terminal, Terminal::Open) {
            shared.terminal = Terminal::Closed;
            trace!("Queue closed");
            shared.wake_all();
        }
    }

    /// Fail the queue
    ///
    /// Values not yet delivered are discarded. Every reader yields `error`
    /// once and then ends. Has no effect on a queue that is already terminal.
    pub fn error(&self, error: Error) {
        self.fail(error);
    }

    fn fail(&self, error: Error) {
        let mut shared = self.shared.lock();
        if matches!(shared.terminal, Terminal::Open) {
            trace!(error = %error, "Queue errored");
            shared.terminal = Terminal::Errored(error);
            shared.values.clear();
            shared.wake_all();
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> QueueState {
        if self.abort.is_aborted() {
            self.fail(Error::Abort);
        }
        self.shared.lock().state()
    }

    /// Number of values pushed and still retained
    pub fn len(&self) -> usize {
        self.shared.lock().values.len()
    }

    /// Whether no values are retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> AsyncQueue<T> {
    /// Create a reader positioned at the first value
    pub fn reader(&self) -> AsyncQueueReader<T> {
        let id = {
            let mut shared = self.shared.lock();
            shared.next_reader += 1;
            shared.next_reader
        };

        let abort = if self.abort.can_abort() {
            let cancelled: Pin<Box<dyn Future<Output = ()> + Send>> =
                Box::pin(self.abort.cancelled_owned());
            Some(cancelled)
        } else {
            None
        };

        AsyncQueueReader {
            queue: self.clone(),
            id,
            cursor: 0,
            abort,
            done: false,
        }
    }
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            abort: self.abort.clone(),
        }
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("AsyncQueue")
            .field("state", &shared.state())
            .field("len", &shared.values.len())
            .finish()
    }
}

/// Consuming side of an [`AsyncQueue`]
///
/// Yields `Ok(value)` for every pushed value, then ends on close. When the
/// queue errors it yields the error once and ends.
pub struct AsyncQueueReader<T> {
    queue: AsyncQueue<T>,
    id: u64,
    cursor: usize,
    abort: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    done: bool,
}

impl<T> AsyncQueueReader<T> {
    /// Lifecycle state of the underlying queue
    pub fn state(&self) -> QueueState {
        self.queue.state()
    }
}

impl<T: Clone> Stream for AsyncQueueReader<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(abort) = this.abort.as_mut() {
            if abort.as_mut().poll(cx).is_ready() {
                this.abort = None;
                this.queue.fail(Error::Abort);
            }
        }

        let mut shared = this.queue.shared.lock();
        if let Terminal::Errored(error) = &shared.terminal {
            let error = error.clone();
            shared.wakers.remove(&this.id);
            this.done = true;
            return Poll::Ready(Some(Err(error)));
        }

        if let Some(value) = shared.values.get(this.cursor) {
            let value = value.clone();
            this.cursor += 1;
            return Poll::Ready(Some(Ok(value)));
        }

        match shared.terminal {
            Terminal::Closed => {
                shared.wakers.remove(&this.id);
                this.done = true;
                Poll::Ready(None)
            }
            _ => {
                shared.wakers.insert(this.id, cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for AsyncQueueReader<T> {
    fn drop(&mut self) {
        self.queue.shared.lock().wakers.remove(&self.id);
    }
}

impl<T> fmt::Debug for AsyncQueueReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueueReader")
            .field("cursor", &self.cursor)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::AbortController;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    async fn drain<T: Clone>(reader: AsyncQueueReader<T>) -> Vec<Result<T>> {
        reader.collect().await
    }

    #[tokio::test]
    async fn test_values_delivered_in_push_order() {
        let queue = AsyncQueue::new();
        for i in 1..=3 {
            queue.push(i).unwrap();
        }
        queue.close();

        let values: Vec<i32> = drain(queue.reader())
            .await
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(queue.state(), QueueState::Closed);
    }

    #[tokio::test]
    async fn test_push_after_terminal_fails() {
        let queue = AsyncQueue::new();
        queue.close();
        assert!(matches!(queue.push(1), Err(Error::QueueClosed)));

        let queue = AsyncQueue::new();
        queue.error(Error::network("lost"));
        assert!(matches!(queue.push(1), Err(Error::QueueClosed)));
        assert_eq!(queue.state(), QueueState::Errored);
    }

    #[tokio::test]
    async fn test_late_reader_sees_every_value() {
        let queue: AsyncQueue<&str> = AsyncQueue::new();
        let early = queue.reader();
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        let late = queue.reader();
        queue.push("c").unwrap();
        queue.close();

        let early: Vec<_> = drain(early).await.into_iter().map(|v| v.unwrap()).collect();
        let late: Vec<_> = drain(late).await.into_iter().map(|v| v.unwrap()).collect();
        assert_eq!(early, vec!["a", "b", "c"]);
        assert_eq!(late, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_reader_waits_for_producer() {
        let queue: AsyncQueue<i32> = AsyncQueue::new();
        let reader = queue.reader();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    queue.push(i).unwrap();
                    tokio::task::yield_now().await;
                }
                queue.close();
            })
        };

        let values: Vec<i32> = drain(reader).await.into_iter().map(|v| v.unwrap()).collect();
        producer.await.unwrap();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pending_reader_is_woken() {
        let queue: AsyncQueue<i32> = AsyncQueue::new();
        let mut reader = task::spawn(queue.reader());

        assert_pending!(reader.poll_next());
        queue.push(7).unwrap();
        assert!(reader.is_woken());
        assert_eq!(assert_ready!(reader.poll_next()).unwrap().unwrap(), 7);

        assert_pending!(reader.poll_next());
        queue.close();
        assert!(reader.is_woken());
        assert!(assert_ready!(reader.poll_next()).is_none());
    }

    #[tokio::test]
    async fn test_error_discards_buffered_values() {
        let queue: AsyncQueue<i32> = AsyncQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.error(Error::decode("broken frame"));

        let items = drain(queue.reader()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap_err().to_string(),
            "Decode error: broken frame"
        );
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_close_after_error_is_ignored() {
        let queue: AsyncQueue<i32> = AsyncQueue::new();
        queue.error(Error::network("gone"));
        queue.close();
        assert_eq!(queue.state(), QueueState::Errored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_terminates_waiting_reader() {
        let controller = AbortController::new();
        let queue: AsyncQueue<i32> = AsyncQueue::with_abort(controller.signal());
        let mut reader = queue.reader();

        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            controller.abort();
        });

        let item = reader.next().await.unwrap();
        assert!(item.unwrap_err().is_abort());
        assert!(reader.next().await.is_none());
        aborter.await.unwrap();

        assert_eq!(queue.state(), QueueState::Errored);
        assert!(matches!(queue.push(1), Err(Error::QueueClosed)));
    }
}
