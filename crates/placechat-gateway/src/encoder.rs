//! SSE frame encoding for run events.
//!
//! A frame is `data: <json>\n\n`. The JSON uses `", "` and `": "` as
//! separators (`{"content": "hello"}`), keeps fields in declaration order and
//! writes non-ASCII text as-is.

use std::fmt;
use std::io;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error};

use placechat_agent::RunEvent;

/// One encoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame(String);

impl SseFrame {
    /// Serialize `payload` into a frame.
    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(b"data: ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
        payload.serialize(&mut ser)?;
        buf.extend_from_slice(b"\n\n");
        // serde_json only ever writes UTF-8.
        String::from_utf8(buf)
            .map(Self)
            .map_err(|e| serde_json::Error::io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SseFrame> for Bytes {
    fn from(frame: SseFrame) -> Self {
        Bytes::from(frame.0)
    }
}

/// Text payload sent to the browser.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_partial: Option<bool>,
}

/// Role-tagged payload.
#[derive(Debug, Clone, Serialize)]
pub struct SseMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameOptions {
    /// Add `"is_partial"` to text frames.
    pub include_partial_flag: bool,
}

/// Turns run events into frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamFrameEncoder {
    options: FrameOptions,
}

impl StreamFrameEncoder {
    pub fn new(options: FrameOptions) -> Self {
        Self { options }
    }

    /// Encode one event. Only text produces a frame; everything else, and any
    /// event that fails to serialize, yields `None`.
    pub fn encode(&self, event: &RunEvent) -> Option<SseFrame> {
        let RunEvent::TextDelta { text, is_partial } = event else {
            debug!(kind = event.kind(), "Event not streamed");
            return None;
        };

        let payload = AssistantMessage {
            content: text.clone(),
            is_partial: self.options.include_partial_flag.then_some(*is_partial),
        };
        match SseFrame::from_payload(&payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(%e, "Failed to encode text event, skipping");
                None
            }
        }
    }

    /// Encode a role-tagged message.
    pub fn encode_item(&self, role: &str, content: &str) -> Option<SseFrame> {
        let payload = SseMessage {
            role: role.to_string(),
            content: content.to_string(),
        };
        match SseFrame::from_payload(&payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(%e, role, "Failed to encode item, skipping");
                None
            }
        }
    }
}

/// Compact JSON with a space after `,` and `:`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
