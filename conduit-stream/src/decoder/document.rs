//! Growing-document decoding

use super::StreamDecoder;
use crate::partial_json;
use conduit_core::{Error, Result};
use serde_json::Value;

/// How the accumulated buffer is interpreted after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentParse {
    /// Yield only when the buffer is a complete JSON document
    #[default]
    Strict,
    /// Yield the repaired parse of every prefix that can be repaired
    Partial,
}

/// Re-parses a single growing JSON document after every chunk
///
/// A value is yielded whenever the buffer parses and differs from the
/// previously yielded value.
#[derive(Debug, Default)]
pub struct DocumentDecoder {
    buffer: String,
    mode: DocumentParse,
    last: Option<Value>,
}

impl DocumentDecoder {
    /// Create a decoder for the given parse mode
    pub fn new(mode: DocumentParse) -> Self {
        Self {
            buffer: String::new(),
            mode,
            last: None,
        }
    }

    /// Text accumulated so far
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    fn emit(&mut self, value: Value) -> Option<Value> {
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        self.last = Some(value.clone());
        Some(value)
    }
}

impl StreamDecoder for DocumentDecoder {
    type Output = Value;

    fn decode(&mut self, text: &str) -> Result<Vec<Value>> {
        self.buffer.push_str(text);
        if self.buffer.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parsed = match self.mode {
            DocumentParse::Strict => serde_json::from_str(&self.buffer).ok(),
            DocumentParse::Partial => partial_json::parse_partial(&self.buffer),
        };

        Ok(parsed.and_then(|value| self.emit(value)).into_iter().collect())
    }

    fn finish(&mut self) -> Result<Option<Value>> {
        if self.buffer.trim().is_empty() {
            return Err(Error::decode("stream ended before any document was received"));
        }

        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(value) => Ok(self.emit(value)),
            Err(e) => Err(Error::decode_with_source(
                "stream ended before the document was complete",
                e,
            )),
        }
    }
}
