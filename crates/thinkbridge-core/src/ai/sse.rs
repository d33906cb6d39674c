//! SSE (Server-Sent Events) frame parsing
//!
//! Turns upstream byte chunks of any size into discrete wire events. Partial
//! frames are kept across reads; only blank-line terminated frames come out.

use serde_json::Value;
use tracing::{debug, trace};

use crate::constants::stream::{DONE_EVENT, DONE_MARKER};

/// One complete SSE frame
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    /// Parsed `data:` payload; `None` for the terminator and data-less frames
    pub data: Option<Value>,
}

impl WireEvent {
    /// The event produced for a `data: [DONE]` frame
    pub fn done() -> Self {
        Self {
            id: None,
            event: Some(DONE_EVENT.to_string()),
            data: None,
        }
    }

    /// Event carrying a JSON payload
    pub fn data(data: Value) -> Self {
        Self {
            id: None,
            event: None,
            data: Some(data),
        }
    }

    /// Whether this frame terminates the stream
    pub fn is_done(&self) -> bool {
        self.data.is_none() && self.event.as_deref() == Some(DONE_EVENT)
    }
}

/// Incremental SSE parser with a carry-over buffer
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes not yet part of a complete frame (`\r` already stripped)
    buffer: Vec<u8>,
    /// Offset up to which `buffer` is known to hold no frame terminator
    scanned: usize,
    /// Events produced since creation or the last reset
    event_count: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a text chunk
    pub fn parse(&mut self, chunk: &str) -> Vec<WireEvent> {
        self.feed(chunk.as_bytes())
    }

    /// Parse a raw byte chunk
    ///
    /// A chunk may end inside a UTF-8 sequence; frames are only decoded once
    /// complete, so split characters survive.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        let mut consumed = 0;

        // Resume one byte early: the previous scan may have stopped between the two newlines
        let mut search_from = self.scanned.saturating_sub(1);
        while let Some(offset) = find_frame_end(&self.buffer[search_from..]) {
            let end = search_from + offset;
            if let Some(event) = parse_frame(&self.buffer[consumed..end]) {
                events.push(event);
            }
            consumed = end + 2;
            search_from = consumed;
        }

        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();
        self.event_count += events.len();

        trace!(
            "SSE parser: {} bytes in, {} events out, {} bytes buffered",
            chunk.len(),
            events.len(),
            self.buffer.len()
        );
        events
    }

    /// Clear buffered bytes and the event counter
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.event_count = 0;
    }

    /// Events produced so far
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Buffered, not yet terminated input
    pub fn buffer(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Decode one frame body (without its terminating blank line)
fn parse_frame(frame: &[u8]) -> Option<WireEvent> {
    let text = String::from_utf8_lossy(frame);

    let mut id = None;
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "id" => id = Some(value.to_string()),
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        if id.is_none() && event.is_none() {
            return None;
        }
        return Some(WireEvent {
            id,
            event,
            data: None,
        });
    }

    let data = data_lines.join("\n");
    if data.trim() == DONE_MARKER {
        return Some(WireEvent {
            id,
            ..WireEvent::done()
        });
    }

    match serde_json::from_str::<Value>(&data) {
        Ok(json) => Some(WireEvent {
            id,
            event,
            data: Some(json),
        }),
        Err(e) => {
            debug!("Dropping malformed SSE frame ({}): {}", e, data);
            None
        }
    }
}
