//! Server-sent event decoding.
//!
//! Incremental parser for `text/event-stream` bodies. Chunks may split
//! lines (and UTF-8 sequences) anywhere; bytes are buffered until a full
//! line is available. Only `data:` fields are used; a blank line ends an
//! event.

use tracing::warn;

use crate::wire::StreamFrame;

/// Maximum buffered bytes before the decoder gives up on a stream
const MAX_BUF: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    overflowed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.overflowed {
            return Vec::new();
        }
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_BUF {
            warn!(buffered = self.pending.len(), "Event stream buffer overflow; dropping stream");
            self.pending.clear();
            self.data.clear();
            self.overflowed = true;
            return Vec::new();
        }

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush an event left unterminated at end of stream
    pub fn finish(&mut self) -> Option<StreamFrame> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<StreamFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamFrame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = std::mem::take(&mut self.data).join("\n");
        match serde_json::from_str::<StreamFrame>(&payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable stream frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"event_type":"tool_result","data":{"success":true,"result":{"output":"é"}},"timestamp":"2024-01-01T00:00:00Z"}"#;

    #[test]
    fn test_frame_split_across_chunks() {
        let wire = format!("data: {FRAME}\n\n");
        let bytes = wire.as_bytes();
        let mut decoder = SseDecoder::new();

        let mut frames = Vec::new();
        for chunk in bytes.chunks(7) {
            frames.extend(decoder.feed(chunk));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, "tool_result");
        assert_eq!(frames[0].data["result"]["output"], "é");
    }

    #[test]
    fn test_comments_crlf_and_multiple_events() {
        let wire = format!(": keep-alive\r\ndata: {FRAME}\r\n\r\nevent: x\ndata:{FRAME}\n\n");
        let frames = SseDecoder::new().feed(wire.as_bytes());
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_garbage_is_skipped_and_tail_flushed() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: not json\n\n").is_empty());
        assert!(decoder.feed(format!("data: {FRAME}").as_bytes()).is_empty());
        assert!(decoder.finish().is_some());
    }
}
