//! Hooks and results of streaming calls

use chrono::{DateTime, Utc};
use conduit_core::Result;
use conduit_stream::AsyncQueueReader;

/// Turns decoded stream values into the values handed to readers
///
/// Used with [`CallExecutor::execute_stream_with`](crate::CallExecutor::execute_stream_with)
/// when a stream needs a final value or a completion hook, e.g. to resolve
/// the full text once every delta has arrived.
pub trait StreamProcessor<I>: Send + 'static {
    /// Value pushed to readers
    type Item: Clone + Send + 'static;

    /// Map one decoded value; `None` skips it
    fn process(&mut self, value: I) -> Result<Option<Self::Item>>;

    /// Final value pushed after the stream ended cleanly
    fn finish(&mut self) -> Result<Option<Self::Item>> {
        Ok(None)
    }

    /// Called once after a successful stream, before readers see the end
    fn done(&mut self) {}
}

/// Processor made from a plain mapping closure
pub(crate) struct ProcessFn<F>(pub(crate) F);

impl<I, U, F> StreamProcessor<I> for ProcessFn<F>
where
    F: FnMut(I) -> Result<Option<U>> + Send + 'static,
    U: Clone + Send + 'static,
{
    type Item = U;

    fn process(&mut self, value: I) -> Result<Option<U>> {
        (self.0)(value)
    }
}

/// Reader of a streaming call together with the call's identity
#[derive(Debug)]
pub struct StreamResponse<U> {
    /// Processed values of the call
    pub reader: AsyncQueueReader<U>,
    /// Id of the call
    pub call_id: String,
    /// When the call started
    pub start_timestamp: DateTime<Utc>,
}

impl<U> StreamResponse<U> {
    /// Drop the metadata and keep the reader
    pub fn into_reader(self) -> AsyncQueueReader<U> {
        self.reader
    }
}
