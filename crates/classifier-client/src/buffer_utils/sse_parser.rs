use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

use super::buffering::LineBuffer;
use crate::error::{ProtocolParseError, Result};
use crate::streaming::EventPayload;
use crate::transport::ByteStream;

/// Prefix that marks a line as an event record.
pub const EVENT_MARKER: &str = "data: ";

/// Events decoded from one network chunk, in stream order.
pub type ChunkEvents<E> = Pin<Box<dyn Stream<Item = Result<Vec<E>>> + Send>>;

/// Strategy pattern for decoding the payload of an event record
pub trait SseLineParser: Send {
    type Event: Send + 'static;

    /// Parse the text after the marker.
    ///
    /// `Ok(None)` means the record is well-formed but carries nothing to
    /// dispatch.
    fn parse_data_line(&self, data: &str) -> std::result::Result<Option<Self::Event>, ProtocolParseError>;
}

/// Parser for classification job events.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobEventParser;

impl SseLineParser for JobEventParser {
    type Event = EventPayload;

    fn parse_data_line(&self, data: &str) -> std::result::Result<Option<EventPayload>, ProtocolParseError> {
        let value: Value = serde_json::from_str(data)?;
        EventPayload::from_value(value)
    }
}

/// Turn one complete line into an event, if it is a valid record.
///
/// Lines without the marker (including blank keep-alive lines) are skipped.
/// Malformed records are logged and dropped.
pub fn parse_line<P: SseLineParser>(parser: &P, line: &str) -> Option<P::Event> {
    let Some(data) = line.strip_prefix(EVENT_MARKER) else {
        if !line.is_empty() {
            tracing::debug!(line, "Skipping non-event line");
        }
        return None;
    };

    match parser.parse_data_line(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed event record");
            None
        }
    }
}

/// Frame a chunked byte stream into batches of events, one batch per chunk.
///
/// The stream ends after the first transport error.
pub fn parse_sse_stream<P: SseLineParser + 'static>(
    stream: ByteStream,
    parser: P,
) -> ChunkEvents<P::Event> {
    Box::pin(async_stream::stream! {
        let mut byte_chunks = stream;
        let mut buffer = LineBuffer::with_capacity(4096);

        while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    let events: Vec<P::Event> = buffer
                        .push(&bytes)
                        .iter()
                        .filter_map(|line| parse_line(&parser, line))
                        .collect();
                    yield Ok(events);
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }

        if let Some(tail) = buffer.finish() {
            tracing::debug!(bytes = tail.len(), "Discarding unterminated trailing line");
        }
    })
}
