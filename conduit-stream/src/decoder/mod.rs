//! Decoding raw response bodies into typed deltas

pub mod document;
pub mod event;

pub use document::{DocumentDecoder, DocumentParse};
pub use event::{EventDecoder, JsonEventDecoder, ServerSentEvent, DONE_SENTINEL};

use conduit_core::{Delta, Error, Result};
use futures::StreamExt;
use futures_core::Stream;
use pin_project::pin_project;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Incremental text-to-value decoder
pub trait StreamDecoder: Send {
    /// Decoded unit
    type Output;

    /// Feed the next chunk of text, returning every value it completes
    fn decode(&mut self, text: &str) -> Result<Vec<Self::Output>>;

    /// Signal the end of input
    ///
    /// Returns a last value if one was still buffered, or an error when the
    /// input ended in the middle of a frame.
    fn finish(&mut self) -> Result<Option<Self::Output>>;
}

/// Reassembles UTF-8 text from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Create a chunker
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` as possible, keeping an incomplete trailing
    /// sequence for the next call
    pub fn push(&mut self, bytes: &[u8]) -> Result<String> {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                Ok(text)
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let tail = self.pending.split_off(valid);
                let text = String::from_utf8(std::mem::replace(&mut self.pending, tail))
                    .map_err(|e| Error::decode_with_source("Invalid UTF-8 in response", e))?;
                Ok(text)
            }
            Err(e) => Err(Error::decode_with_source("Invalid UTF-8 in response", e)),
        }
    }

    /// Fail if the input ended inside a multi-byte sequence
    pub fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            self.pending.clear();
            Err(Error::decode("stream ended inside a UTF-8 sequence"))
        }
    }
}

/// Stream of deltas decoded from a byte stream
///
/// Transport errors and decode failures are yielded as a single
/// [`Delta::Error`], after which the stream ends.
#[pin_project]
pub struct DecodedStream<S, D: StreamDecoder> {
    #[pin]
    inner: S,
    decoder: D,
    chunker: Utf8Chunker,
    ready: VecDeque<D::Output>,
    done: bool,
}

impl<S, D: StreamDecoder> DecodedStream<S, D> {
    /// Wrap `inner`, decoding with `decoder`
    pub fn new(inner: S, decoder: D) -> Self {
        Self {
            inner,
            decoder,
            chunker: Utf8Chunker::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, B, D> Stream for DecodedStream<S, D>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
    D: StreamDecoder,
{
    type Item = Delta<D::Output>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(value) = this.ready.pop_front() {
                return Poll::Ready(Some(Delta::Data(value)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let decoded = this
                        .chunker
                        .push(chunk.as_ref())
                        .and_then(|text| this.decoder.decode(&text));
                    match decoded {
                        Ok(values) => this.ready.extend(values),
                        Err(e) => {
                            debug!(error = %e, "Stream decoding failed");
                            *this.done = true;
                            return Poll::Ready(Some(Delta::Error(e)));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!(error = %e, "Transport error while streaming");
                    *this.done = true;
                    return Poll::Ready(Some(Delta::Error(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    let last = this.chunker.finish().and_then(|_| this.decoder.finish());
                    match last {
                        Ok(value) => this.ready.extend(value),
                        Err(e) => {
                            debug!(error = %e, "Stream ended prematurely");
                            return Poll::Ready(Some(Delta::Error(e)));
                        }
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Decode a byte stream with any decoder
pub fn decode_stream<S, B, D>(stream: S, decoder: D) -> DecodedStream<S, D>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
    D: StreamDecoder,
{
    DecodedStream::new(stream, decoder)
}

/// Decode an event-framed byte stream into raw events
pub fn decode_events<S, B>(stream: S) -> DecodedStream<S, EventDecoder>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    DecodedStream::new(stream, EventDecoder::new())
}

/// Decode an event-framed byte stream whose payloads are JSON values
pub fn decode_json_events<T, S, B>(stream: S) -> DecodedStream<S, JsonEventDecoder<T>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    DecodedStream::new(stream, JsonEventDecoder::new())
}

/// Decode a byte stream carrying one growing JSON document
pub fn decode_document<S, B>(stream: S, mode: DocumentParse) -> DecodedStream<S, DocumentDecoder>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    DecodedStream::new(stream, DocumentDecoder::new(mode))
}

/// Drain a delta stream and return its final value
///
/// An error delta, or a stream that ends without any value, is an error.
pub async fn resolve_final<S, T>(stream: S) -> Result<T>
where
    S: Stream<Item = Delta<T>>,
{
    futures::pin_mut!(stream);

    let mut last = None;
    while let Some(delta) = stream.next().await {
        last = Some(delta.into_result()?);
    }
    last.ok_or_else(|| Error::decode("stream ended without producing a value"))
}

/// Decode a growing document and parse the completed document as `T`
pub async fn resolve_document<T, S, B>(stream: S) -> Result<T>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    let value: Value = resolve_final(decode_document(stream, DocumentParse::Strict)).await?;
    Ok(serde_json::from_value(value)?)
}
