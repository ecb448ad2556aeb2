//! Incremental Server-Sent Events parser.
//!
//! Frames are groups of `data:` lines terminated by a blank line; the
//! lines of one frame are joined with `\n`. Comment lines (leading `:`)
//! and unknown fields are skipped. Terminal sentinels such as `[DONE]`
//! are the consumer's concern, not the parser's.

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a byte chunk and return any completed frame payloads.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(frame) = self.accept_line(line.trim()) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush the trailing frame when the stream ends without a final blank
    /// line.
    pub fn finish(mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&tail);
        let line = line.trim();
        if !line.is_empty() && !line.starts_with(':') {
            if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim().to_string());
            }
        }
        self.flush()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim().to_string());
        }
        None
    }

    fn flush(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let frame = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_consecutive_data_lines_with_newlines() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: hello\ndata: world\n\n");
        assert_eq!(frames, vec!["hello\nworld".to_string()]);
    }

    #[test]
    fn skips_comment_lines() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\ndata: hi\n\n");
        assert_eq!(frames, vec!["hi".to_string()]);
    }

    #[test]
    fn handles_frames_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: par").is_empty());
        assert!(parser.push(b"tial\n").is_empty());
        let frames = parser.push(b"\n");
        assert_eq!(frames, vec!["partial".to_string()]);
    }

    #[test]
    fn handles_crlf_line_endings() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(frames, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn finish_flushes_an_unterminated_frame() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        assert_eq!(parser.finish(), Some("tail".to_string()));
    }

    #[test]
    fn finish_returns_none_when_nothing_is_pending() {
        let parser = SseParser::new();
        assert_eq!(parser.finish(), None);
    }
}
