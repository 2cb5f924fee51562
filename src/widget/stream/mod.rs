
// Line-oriented framing for the chat stream. Each line is a type tag,
// a colon, and a JSON payload:
//   0:"delta text"     text delta, concatenated in order by consumers
//   3:{"error":"..."}  terminal error
//   d:{}               end of stream
// Both the server writer and the widget parser live here so they cannot
// drift apart.

use serde::{Deserialize, Serialize};

pub const TAG_TEXT: &str = "0";
pub const TAG_ERROR: &str = "3";
pub const TAG_DONE: &str = "d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFrame {
    TextDelta(String),
    Error(String),
    Done,
}

#[derive(Debug, Deserialize, Serialize)]
struct ErrorPayload {
    error: String,
}

/// Encode a text delta as one wire line.
#[inline]
pub fn encode_text_delta(text: &str) -> String {
    // serde_json string encoding handles newlines inside deltas
    format!("{}:{}\n", TAG_TEXT, serde_json::json!(text))
}

/// Encode a terminal error as one wire line.
#[inline]
pub fn encode_error(message: &str) -> String {
    let payload = serde_json::to_string(&ErrorPayload {
        error: message.to_string(),
    })
    .unwrap_or_else(|_| r#"{"error":"stream error"}"#.to_string());
    format!("{}:{}\n", TAG_ERROR, payload)
}

/// Encode the end-of-stream marker.
#[inline]
pub fn encode_done() -> String {
    format!("{}:{{}}\n", TAG_DONE)
}

/// Parse one complete line. Unknown tags and malformed payloads yield
/// `None`; consumers skip them rather than aborting the stream.
#[inline]
pub fn parse_line(line: &str) -> Option<StreamFrame> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (tag, payload) = line.split_once(':')?;

    match tag {
        TAG_TEXT => serde_json::from_str::<String>(payload)
            .ok()
            .map(StreamFrame::TextDelta),
        TAG_ERROR => serde_json::from_str::<ErrorPayload>(payload)
            .ok()
            .map(|p| StreamFrame::Error(p.error)),
        TAG_DONE => Some(StreamFrame::Done),
        _ => None,
    }
}

/// Incremental consumer: feed arbitrary network chunks, read back the
/// assembled text. Partial lines stay buffered until their newline
/// arrives.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    buffer: String,
    text: String,
    error: Option<String>,
    done: bool,
}

impl StreamAssembler {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning the frames completed by it.
    #[inline]
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamFrame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let Some(frame) = parse_line(&line) else {
                continue;
            };
            match &frame {
                StreamFrame::TextDelta(delta) => self.text.push_str(delta),
                StreamFrame::Error(message) => self.error = Some(message.clone()),
                StreamFrame::Done => self.done = true,
            }
            frames.push(frame);
        }
        frames
    }

    /// Text accumulated so far, in delta order.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }
}
