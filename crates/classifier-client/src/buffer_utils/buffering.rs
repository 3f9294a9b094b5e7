use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Incremental line framer for a chunked UTF-8 byte stream.
///
/// Bytes go through a stateful decoder, so a multi-byte character split
/// across two chunks is reassembled instead of being replaced. Decoded text
/// is appended to a carry-over string which, between calls, holds only the
/// tail that has not been terminated by `\n` yet.
pub struct LineBuffer {
    decoder: Decoder,
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            decoder: UTF_8.new_decoder_with_bom_removal(),
            pending: String::with_capacity(capacity),
        }
    }

    /// Feed one chunk and return every line it completed, without the `\n`.
    /// A trailing `\r` is stripped so CRLF framing yields the same lines.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk, false);
        self.take_complete_lines()
    }

    /// Flush the decoder at end of input and return any unterminated tail.
    pub fn finish(&mut self) -> Option<String> {
        self.decode(&[], true);
        let tail = std::mem::take(&mut self.pending);
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// Carry-over content not yet terminated by a line break.
    pub fn remainder(&self) -> &str {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn decode(&mut self, mut input: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len().saturating_mul(3) + 4);
            self.pending.reserve(needed);

            let (result, read, replaced) =
                self.decoder.decode_to_string(input, &mut self.pending, last);
            if replaced {
                tracing::warn!("Replaced malformed UTF-8 sequence in event stream");
            }
            input = &input[read..];

            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_break) = self.pending.rfind('\n') else {
            return Vec::new();
        };

        let tail = self.pending.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.pending, tail);

        complete[..last_break]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_basic() {
        let mut buffer = LineBuffer::with_capacity(64);

        let lines = buffer.push(b"line1\nline2\n");

        assert_eq!(lines, vec!["line1", "line2"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_line() {
        let mut buffer = LineBuffer::with_capacity(64);

        assert!(buffer.push(b"partial").is_empty());
        assert_eq!(buffer.remainder(), "partial");

        assert_eq!(buffer.push(b" line\n"), vec!["partial line"]);
        assert_eq!(buffer.remainder(), "");
    }

    #[test]
    fn test_tail_is_carried_over() {
        let mut buffer = LineBuffer::new();

        assert_eq!(buffer.push(b"a\nb\nc"), vec!["a", "b"]);
        assert_eq!(buffer.remainder(), "c");
    }

    #[test]
    fn test_blank_lines_are_complete_lines() {
        let mut buffer = LineBuffer::new();

        assert_eq!(buffer.push(b"data: 1\n\n\n"), vec!["data: 1", "", ""]);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut buffer = LineBuffer::new();

        assert_eq!(buffer.push(b"one\r\ntwo\r"), vec!["one"]);
        assert_eq!(buffer.push(b"\n"), vec!["two"]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let text = "분류\n".as_bytes();
        let mut buffer = LineBuffer::new();

        // Split inside the first three-byte character.
        assert!(buffer.push(&text[..1]).is_empty());
        assert!(buffer.push(&text[1..4]).is_empty());
        assert_eq!(buffer.push(&text[4..]), vec!["분류"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "data: {\"message\":\"완료\"}\nrest".as_bytes();
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();

        for byte in text {
            lines.extend(buffer.push(std::slice::from_ref(byte)));
        }

        assert_eq!(lines, vec!["data: {\"message\":\"완료\"}"]);
        assert_eq!(buffer.remainder(), "rest");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"").is_empty());
        assert!(buffer.push(b"x").is_empty());
        assert!(buffer.push(b"").is_empty());
        assert_eq!(buffer.remainder(), "x");
    }

    #[test]
    fn test_finish_returns_tail() {
        let mut buffer = LineBuffer::new();

        buffer.push(b"done\nleft");
        assert_eq!(buffer.finish().as_deref(), Some("left"));
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_finish_replaces_truncated_character() {
        let mut buffer = LineBuffer::new();

        buffer.push(&"완".as_bytes()[..2]);
        assert_eq!(buffer.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_leading_bom_is_removed() {
        let mut buffer = LineBuffer::new();

        assert_eq!(buffer.push(b"\xEF\xBB\xBFdata: x\n"), vec!["data: x"]);
    }
}
