//! Incremental Server-Sent-Events decoder.
//!
//! Implements the subset of the WHATWG EventStream format used by the
//! providers this tool observes: blank-line-separated blocks of
//! `field: value` lines. Not thread-safe; one parser per flow.

use serde::{Deserialize, Serialize};

/// One decoded `text/event-stream` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// `event:` value, defaulting to `"message"` per the spec when omitted.
    pub event_type: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// `id:` value, if the block carried one.
    pub id: Option<String>,
    /// `retry:` value, captured verbatim (never parsed as an integer).
    pub retry: Option<String>,
}

/// Stateful incremental decoder. Feed it chunks in arrival order; call
/// [`flush`](SseParser::flush) once at end-of-stream for any residue.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk` as UTF-8 (lossily) and append it to the internal
    /// buffer, returning every complete event the new data completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = find_block_end(&self.buffer) {
            let block: String = self.buffer.drain(..pos).collect();
            // drain also removed the blank-line separator itself.
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever remains in the buffer as a final, unterminated
    /// block, then clear the buffer. Call once, at end of stream.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return Vec::new();
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block).into_iter().collect()
    }
}

/// Find the end of the first complete block in `buf`, i.e. the index just
/// past the blank line (`\n\n`, tolerating a preceding `\r`) separating it
/// from the next. Returns `None` if no complete block is buffered yet.
fn find_block_end(buf: &str) -> Option<usize> {
    let bytes = buf.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' {
            // Is the next line blank (ignoring an optional \r)?
            let mut j = i + 1;
            if j < bytes.len() && bytes[j] == b'\r' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'\n' {
                return Some(j + 1);
            }
        }
        i += 1;
    }
    None
}

/// Parse one block's worth of lines into an event. Returns `None` if the
/// block contained no recognized field (comment-only or empty blocks).
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id: Option<String> = None;
    let mut retry: Option<String> = None;
    let mut saw_field = false;

    for raw_line in block.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(':') {
            continue; // comment
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => {
                event_type = Some(value.to_string());
                saw_field = true;
            }
            "data" => {
                data_lines.push(value);
                saw_field = true;
            }
            "id" => {
                id = Some(value.to_string());
                saw_field = true;
            }
            "retry" => {
                retry = Some(value.to_string());
                saw_field = true;
            }
            _ => {} // unknown field, ignored
        }
    }

    if !saw_field {
        return None;
    }

    Some(SseEvent {
        event_type: event_type.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
        id,
        retry,
    })
}

/// True iff `content_type` names the SSE media type, case-insensitively.
pub fn is_sse_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/event-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_two_events() {
        let mut p = SseParser::new();
        let evs = p.feed(b"event: message_start\ndata: {\"type\":\"x\"}\n\nevent: ping\ndata: {}\n\n");
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].event_type, "message_start");
        assert_eq!(evs[0].data, "{\"type\":\"x\"}");
        assert_eq!(evs[1].event_type, "ping");
    }

    #[test]
    fn split_mid_line_no_spurious_events() {
        let mut p = SseParser::new();
        let mut all = Vec::new();
        all.extend(p.feed(b"event: message_st"));
        all.extend(p.feed(b"art\ndata: {\"type\":\"x\"}\n\nevent: pi"));
        all.extend(p.feed(b"ng\ndata: {}\n\n"));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_type, "message_start");
        assert_eq!(all[1].event_type, "ping");
    }

    #[test]
    fn arbitrary_chunking_round_trips() {
        let full = b"event: a\ndata: 1\n\nevent: b\ndata: 2\ndata: 3\n\nevent: c\ndata: 4\n\n";
        for split in [1, 3, 7, 15, 29, full.len() - 1] {
            let (first, second) = full.split_at(split.min(full.len()));
            let mut p = SseParser::new();
            let mut evs = p.feed(first);
            evs.extend(p.feed(second));
            evs.extend(p.flush());
            assert_eq!(evs.len(), 3, "split at {split}");
            assert_eq!(evs[1].data, "2\n3");
        }
    }

    #[test]
    fn comment_only_block_emits_nothing() {
        let mut p = SseParser::new();
        let evs = p.feed(b": this is a comment\n\n");
        assert!(evs.is_empty());
    }

    #[test]
    fn multi_line_data_joins_with_single_newline() {
        let mut p = SseParser::new();
        let evs = p.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(evs[0].data, "line1\nline2");
    }

    #[test]
    fn event_with_only_id_is_still_emitted() {
        let mut p = SseParser::new();
        let evs = p.feed(b"id: 42\n\n");
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].id.as_deref(), Some("42"));
        assert_eq!(evs[0].event_type, "message");
    }

    #[test]
    fn flush_emits_unterminated_residue() {
        let mut p = SseParser::new();
        assert!(p.feed(b"event: partial\ndata: x").is_empty());
        let evs = p.flush();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].event_type, "partial");
    }

    #[test]
    fn flush_on_whitespace_only_emits_nothing() {
        let mut p = SseParser::new();
        p.feed(b"\n\n");
        assert!(p.flush().is_empty());
    }

    #[test]
    fn empty_chunk_is_noop() {
        let mut p = SseParser::new();
        assert!(p.feed(b"").is_empty());
    }

    #[test]
    fn content_type_sniff_is_case_insensitive() {
        assert!(is_sse_content_type("Text/Event-Stream; charset=utf-8"));
        assert!(!is_sse_content_type("application/json"));
    }
}
