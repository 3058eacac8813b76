//! Server-Sent Events framing

/// A single SSE event
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE parser.
///
/// Buffers raw bytes so multi-byte characters split across chunks survive.
/// Comment lines (`:ok`, keep-alives) and frames without `data:` produce no event.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, separator_len)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            let text = String::from_utf8_lossy(&frame[..end]);
            if let Some(event) = parse_frame(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received but not yet terminated by a blank line
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Position and length of the first blank-line separator.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") || rest.starts_with(b"\r\r") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();
    let mut id = None;
    let mut retry = None;

    // Lines end in CRLF, LF or a lone CR.
    for line in text.split(|c: char| c == '\r' || c == '\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => id = Some(value.to_string()),
            "retry" => retry = value.trim().parse().ok(),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
        id,
        retry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: status\ndata: {\"a\":1}\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("status"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: status\nda").is_empty());
        assert!(parser.feed(b"ta: hello\n").is_empty());
        let events = parser.feed(b"\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_crlf_framing() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: one\r\n\r\ndata: two\r\n\r\n");

        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[test]
    fn test_cr_only_framing() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: status\rdata: one\rdata: two\r\rdata: three\r\r");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("status"));
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[1].event, None);
        assert_eq!(events[1].data, "three");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: first\ndata: second\nid: 7\nretry: 3000\n\n");

        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(3000));
    }

    #[test]
    fn test_keepalive_comments_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b":ok\n\n").is_empty());
        assert!(parser.feed(b"\n\n").is_empty());
        assert!(parser.feed(b"event: only-name\n\n").is_empty());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = "data: 18.5°C\n\n".as_bytes();
        // Split inside the two-byte degree sign
        let split = bytes.iter().position(|&b| b == 0xC2).unwrap() + 1;

        assert!(parser.feed(&bytes[..split]).is_empty());
        let events = parser.feed(&bytes[split..]);
        assert_eq!(events[0].data, "18.5°C");
    }

    #[test]
    fn test_value_without_leading_space() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data:{\"x\":1}\n\n");
        assert_eq!(events[0].data, "{\"x\":1}");
    }
}
