//! Incremental server-sent-event parsing
//!
//! Events are blocks separated by a blank line; payload lines carry a
//! `data:` prefix. The parser owns a byte buffer so chunk boundaries can
//! fall anywhere, including inside a UTF-8 sequence.

/// Incremental SSE frame reassembler.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes; returns the `data` payloads of every event
    /// completed by this chunk, in arrival order. Blocks without a `data`
    /// line (comments, heartbeats) produce nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((end, sep)) = find_separator(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + sep).collect();
            let text = String::from_utf8_lossy(&event[..end]);
            if let Some(data) = event_data(&text) {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Position and length of the first event separator, either a bare `\n\n`
/// or the CRLF form `\r\n\r\n`
fn find_separator(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer
        .windows(2)
        .position(|pair| pair == b"\n\n")
        .map(|at| (at, 2));
    let crlf = buffer
        .windows(4)
        .position(|quad| quad == b"\r\n\r\n")
        .map(|at| (at, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (found, other) => found.or(other),
    }
}

/// Extract and concatenate the `data:` lines of one event block
fn event_data(event: &str) -> Option<String> {
    let mut data = String::new();
    for line in event.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }
    if data.is_empty() { None } else { Some(data) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_events_in_arrival_order() {
        let mut parser = SseParser::new();
        let payloads = parser.push(b"data: {\"id\":1}\n\ndata: {\"id\":2}\n\n");
        assert_eq!(payloads, vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn reassembles_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"id").is_empty());
        assert!(parser.push(b"\":1}\n").is_empty());
        let payloads = parser.push(b"\ndata: {\"id\":2}\n\n");
        assert_eq!(payloads, vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn skips_blocks_without_data_lines() {
        let mut parser = SseParser::new();
        let payloads = parser.push(b": heartbeat\n\nevent: ping\n\ndata: {\"ok\":true}\n\n");
        assert_eq!(payloads, vec!["{\"ok\":true}"]);
    }

    #[test]
    fn incomplete_trailing_event_stays_buffered() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"id\":3}\n").is_empty());
        assert_eq!(parser.push(b"\n"), vec!["{\"id\":3}"]);
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut parser = SseParser::new();
        let payloads = parser.push(b"data: {\"id\":4}\r\n\ndata: x\r\n\n");
        assert_eq!(payloads, vec!["{\"id\":4}", "x"]);
    }

    #[test]
    fn recognizes_crlf_event_separators() {
        let mut parser = SseParser::new();
        let payloads = parser.push(b"data: {\"id\":5}\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(payloads, vec!["{\"id\":5}", "y"]);

        // Separator split across chunks still completes the frame.
        assert!(parser.push(b"data: z\r\n").is_empty());
        assert_eq!(parser.push(b"\r\n"), vec!["z"]);
    }

    #[test]
    fn malformed_payload_is_still_surfaced_verbatim() {
        // Classification as JSON happens a layer up; the parser only frames.
        let mut parser = SseParser::new();
        assert_eq!(parser.push(b"data: not-json\n\n"), vec!["not-json"]);
    }
}
