//! Event-framed decoding (server-sent events conventions)

use super::StreamDecoder;
use conduit_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::trace;

/// Sentinel payload some servers send to mark the end of a stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One dispatched event record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerSentEvent {
    /// Value of the `event` field, if present
    pub event: Option<String>,
    /// `data` lines joined with `\n`
    pub data: String,
    /// Value of the `id` field, if present
    pub id: Option<String>,
    /// Reconnection delay announced by the `retry` field
    pub retry: Option<Duration>,
}

#[derive(Default)]
struct PendingRecord {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<Duration>,
    has_fields: bool,
}

impl PendingRecord {
    fn take(&mut self) -> Option<ServerSentEvent> {
        let record = std::mem::take(self);
        if record.data.is_empty() {
            return None;
        }
        Some(ServerSentEvent {
            event: record.event,
            data: record.data.join("\n"),
            id: record.id,
            retry: record.retry,
        })
    }
}

/// Split a `field: value` line; a single space after the colon is dropped
fn parse_field(line: &str) -> (&str, &str) {
    match line.find(':') {
        Some(pos) => {
            let value = &line[pos + 1..];
            (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
        }
        None => (line, ""),
    }
}

/// Decodes blank-line separated `field: value` records
///
/// Lines may end with `\n`, `\r\n` or `\r`, and the terminator may straddle
/// two chunks. A leading byte order mark is skipped. Lines starting with
/// `:` are comments. A record is dispatched
/// on a blank line if it carries at least one `data` line.
#[derive(Default)]
pub struct EventDecoder {
    buffer: String,
    record: PendingRecord,
    skip_line_feed: bool,
    started: bool,
}

impl EventDecoder {
    /// Create a decoder
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &str) -> Option<ServerSentEvent> {
        if line.is_empty() {
            return self.record.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = parse_field(line);
        match field {
            "event" => self.record.event = Some(value.to_string()),
            "data" => self.record.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.record.id = Some(value.to_string()),
            "retry" => match value.parse::<u64>() {
                Ok(ms) => self.record.retry = Some(Duration::from_millis(ms)),
                Err(_) => return None,
            },
            _ => {
                trace!(field, "Ignoring unknown event field");
                return None;
            }
        }
        self.record.has_fields = true;
        None
    }
}

impl StreamDecoder for EventDecoder {
    type Output = ServerSentEvent;

    fn decode(&mut self, text: &str) -> Result<Vec<ServerSentEvent>> {
        let mut text = text;
        if !self.started && !text.is_empty() {
            text = text.strip_prefix('\u{feff}').unwrap_or(text);
            self.started = true;
        }
        if self.skip_line_feed && !text.is_empty() {
            text = text.strip_prefix('\n').unwrap_or(text);
            self.skip_line_feed = false;
        }
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find(['\r', '\n']) {
            let line = self.buffer[..pos].to_string();
            let mut consumed = pos + 1;
            if self.buffer.as_bytes()[pos] == b'\r' {
                match self.buffer.as_bytes().get(pos + 1) {
                    Some(b'\n') => consumed += 1,
                    Some(_) => {}
                    None => self.skip_line_feed = true,
                }
            }
            self.buffer.drain(..consumed);

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        Ok(events)
    }

    fn finish(&mut self) -> Result<Option<ServerSentEvent>> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line);
        }

        if self.record.has_fields {
            return Err(Error::decode(
                "stream ended inside an unterminated event",
            ));
        }
        Ok(None)
    }
}

/// Decodes each event's `data` payload as JSON
///
/// Decoding stops at the sentinel payload (`[DONE]` unless configured
/// otherwise); anything after it is ignored. Values decoded before a
/// malformed payload are yielded before the error.
pub struct JsonEventDecoder<T> {
    events: EventDecoder,
    sentinel: Option<String>,
    done: bool,
    failed: Option<Error>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonEventDecoder<T> {
    /// Create a decoder that stops at `[DONE]`
    pub fn new() -> Self {
        Self {
            events: EventDecoder::new(),
            sentinel: Some(DONE_SENTINEL.to_string()),
            done: false,
            failed: None,
            _marker: PhantomData,
        }
    }

    /// Use a different end-of-stream sentinel, or none
    pub fn with_sentinel(mut self, sentinel: Option<String>) -> Self {
        self.sentinel = sentinel;
        self
    }
}

impl<T> Default for JsonEventDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> StreamDecoder for JsonEventDecoder<T> {
    type Output = T;

    fn decode(&mut self, text: &str) -> Result<Vec<T>> {
        if let Some(error) = self.failed.take() {
            return Err(error);
        }
        if self.done {
            return Ok(Vec::new());
        }

        let mut values = Vec::new();
        for event in self.events.decode(text)? {
            if self.sentinel.as_deref() == Some(event.data.as_str()) {
                trace!("End-of-stream sentinel received");
                self.done = true;
                break;
            }
            match serde_json::from_str(&event.data) {
                Ok(value) => values.push(value),
                Err(e) => {
                    let error =
                        Error::decode_with_source(format!("Failed to parse event data: {}", e), e);
                    self.done = true;
                    if values.is_empty() {
                        return Err(error);
                    }
                    self.failed = Some(error);
                    break;
                }
            }
        }
        Ok(values)
    }

    fn finish(&mut self) -> Result<Option<T>> {
        if let Some(error) = self.failed.take() {
            return Err(error);
        }
        if self.done {
            return Ok(None);
        }
        self.events.finish()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all<D: StreamDecoder>(decoder: &mut D, chunks: &[&str]) -> Vec<D::Output> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.decode(chunk).unwrap());
        }
        out
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("data: hello"), ("data", "hello"));
        assert_eq!(parse_field("data:hello"), ("data", "hello"));
        assert_eq!(parse_field("data:  two"), ("data", " two"));
        assert_eq!(parse_field("data"), ("data", ""));
    }

    #[test]
    fn test_records_split_on_blank_line() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(&mut decoder, &["data: 1\n\ndata: 2\n\n"]);
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2"]);
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_fields_and_multiline_data() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[": keep-alive\nevent: delta\nid: 42\nretry: 1500\ndata: a\ndata: b\n\n"],
        );
        assert_eq!(
            events,
            vec![ServerSentEvent {
                event: Some("delta".into()),
                data: "a\nb".into(),
                id: Some("42".into()),
                retry: Some(Duration::from_millis(1500)),
            }]
        );
    }

    #[test]
    fn test_line_endings_across_chunks() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(&mut decoder, &["data: x\r", "\n\r", "\ndata: y\r\r"]);
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["x", "y"]);
    }

    #[test]
    fn test_record_split_mid_field() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(&mut decoder, &["da", "ta: hel", "lo\n", "\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_leading_byte_order_mark_is_skipped() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(&mut decoder, &["", "\u{feff}data: 1\n\n", "\u{feff}data: 2\n\n"]);
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["1"]);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut decoder = EventDecoder::new();
        let events = decode_all(&mut decoder, &["data: 1\n\ndata: 2"]);
        assert_eq!(events.len(), 1);
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_json_events_stop_at_sentinel() {
        let mut decoder = JsonEventDecoder::<serde_json::Value>::new();
        let values = decode_all(
            &mut decoder,
            &["data: {\"n\":1}\n\n", "data: [DONE]\n\ndata: {\"n\":2}\n\n"],
        );
        assert_eq!(values, vec![serde_json::json!({"n": 1})]);
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_json_events_reject_invalid_payload() {
        let mut decoder = JsonEventDecoder::<i64>::new();
        let err = decoder.decode("data: nope\n\n").unwrap_err();
        assert!(err.to_string().starts_with("Decode error: Failed to parse event data"));
    }

    #[test]
    fn test_values_before_invalid_payload_are_kept() {
        let mut decoder = JsonEventDecoder::<i64>::new();
        let values = decoder.decode("data: 1\n\ndata: nope\n\ndata: 3\n\n").unwrap();
        assert_eq!(values, vec![1]);
        assert!(decoder.finish().is_err());
        assert!(decoder.finish().unwrap().is_none());
    }
}
