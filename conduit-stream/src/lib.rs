//! Streaming building blocks for the Conduit runtime
//!
//! - [`AsyncQueue`] bridges a producer task to any number of stream readers.
//! - [`decoder`] turns raw response bodies into typed [`Delta`](conduit_core::Delta)
//!   streams, either event-framed or as one growing JSON document.
//! - [`partial_json`] repairs truncated JSON documents.
//! - [`http`] posts JSON requests and classifies failed responses.

pub mod decoder;
pub mod http;
pub mod partial_json;
pub mod queue;

pub use decoder::{
    decode_document, decode_events, decode_json_events, decode_stream, resolve_document,
    resolve_final, DecodedStream, DocumentDecoder, DocumentParse, EventDecoder,
    JsonEventDecoder, ServerSentEvent, StreamDecoder, Utf8Chunker,
};
pub use http::{ApiClient, ByteStream, HttpClient};
pub use queue::{AsyncQueue, AsyncQueueReader, QueueState};
