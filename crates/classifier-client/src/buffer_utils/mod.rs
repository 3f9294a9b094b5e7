mod buffering;
mod sse_parser;

pub use buffering::LineBuffer;
pub use sse_parser::{parse_line, parse_sse_stream, ChunkEvents, JobEventParser, SseLineParser, EVENT_MARKER};
