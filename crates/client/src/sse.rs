//! Incremental parser for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks. [`SseParser::feed`] buffers partial
//! lines and returns every frame completed by a blank line. Only the
//! `event:`, `data:` and `id:` fields are kept; comment lines (`:` prefix,
//! used as keepalives) and unknown fields are dropped.

/// A complete server-sent event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes after the last newline seen so far.
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the frames it completes.
    ///
    /// Splitting happens on raw bytes, so a multi-byte UTF-8 character cut
    /// across two chunks is reassembled before decoding. Lines that are not
    /// valid UTF-8 are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let raw = &raw[..raw.len() - 1];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

            match std::str::from_utf8(raw) {
                Ok(line) => {
                    if let Some(frame) = self.process_line(line) {
                        frames.push(frame);
                    }
                }
                Err(_) => tracing::warn!("Skipping non UTF-8 line in event stream"),
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            let id = self.id.take();
            // A frame without data lines is not dispatched.
            if self.data.is_empty() {
                return None;
            }
            return Some(SseFrame {
                event,
                data: std::mem::take(&mut self.data).join("\n"),
                id,
            });
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_frame() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"event: progress\ndata: {\"calculated\":1}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("progress"));
        assert_eq!(frames[0].data, r#"{"calculated":1}"#);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: prog").is_empty());
        assert!(parser.feed(b"ress\nda").is_empty());
        let frames = parser.feed(b"ta: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = "data: café\n\n".as_bytes();
        let cut = bytes.len() - 3;
        assert!(parser.feed(&bytes[..cut]).is_empty());
        let frames = parser.feed(&bytes[cut..]);
        assert_eq!(frames[0].data, "café");
    }

    #[test]
    fn multiline_data_and_id() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"id: 7\ndata: a\ndata:b\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn comments_and_crlf() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b": keepalive\r\n\r\nevent: progress\r\ndata: 1\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("progress"));
        assert_eq!(frames[0].data, "1");
    }

    #[test]
    fn frame_without_data_is_dropped() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"event: progress\nid: 3\n\ndata: 2\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].id, None);
        assert_eq!(frames[0].data, "2");
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event.as_deref(), Some("b"));
    }
}
