//! Decoding of the upvote event stream.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder`] reassembles them into
//! server-sent events and [`StreamFrame::classify`] turns an event's data
//! into something the count store understands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::VoteAction;

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMessage {
    /// A `:` line. Servers use these as keep-alives.
    Comment(String),
    Event {
        event: Option<String>,
        data: String,
        id: Option<String>,
    },
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
    discarding: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection hint sent by the server through a `retry:` field.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feeds a chunk and returns every event it completes. A line longer
    /// than [`MAX_LINE_BYTES`] is dropped along with the event it belongs to.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<SseMessage> {
        let mut messages = Vec::new();
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    chunk = &chunk[pos + 1..];
                    self.discarding = false;
                }
                None => return messages,
            }
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(len = self.buffer.len(), "dropping oversized stream line");
            self.buffer.clear();
            self.data.clear();
            self.event = None;
            self.discarding = true;
        }

        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(comment) = line.strip_prefix(':') {
            return Some(SseMessage::Comment(comment.trim().to_owned()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage::Event {
            event,
            data,
            id: self.last_event_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvoteEvent {
    pub resource_id: String,
    pub count: u64,
    pub action: Option<VoteAction>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    KeepAlive,
    Connected { connection_id: String },
    Upvote(UpvoteEvent),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("unrecognised frame shape")]
    Unrecognised,
}

impl StreamFrame {
    pub fn classify(data: &str) -> Result<Self, FrameError> {
        let data = data.trim();
        if data.starts_with(':') {
            return Ok(StreamFrame::KeepAlive);
        }

        let value: Value = serde_json::from_str(data)?;
        let object = value.as_object().ok_or(FrameError::Unrecognised)?;

        if object.get("type").and_then(Value::as_str) == Some("connected") {
            return object
                .get("connectionId")
                .and_then(Value::as_str)
                .map(|id| StreamFrame::Connected {
                    connection_id: id.to_owned(),
                })
                .ok_or(FrameError::Unrecognised);
        }

        let resource_id = object
            .get("resourceId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(FrameError::Unrecognised)?;
        let count = object
            .get("count")
            .and_then(as_count)
            .ok_or(FrameError::Unrecognised)?;
        let action = object
            .get("action")
            .and_then(|v| serde_json::from_value::<VoteAction>(v.clone()).ok());
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis);

        Ok(StreamFrame::Upvote(UpvoteEvent {
            resource_id: resource_id.to_owned(),
            count,
            action,
            timestamp,
        }))
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    })
}
