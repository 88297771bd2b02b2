use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::LinkError;

/// Longest inbound line kept before it is dropped
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Command sent to the bot
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub command: String,
    pub data: Map<String, Value>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Message received from the bot
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type", default = "unknown_kind")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

fn unknown_kind() -> String {
    "unknown".to_string()
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Payload as an object; anything else reads as empty
    pub fn payload(&self) -> Map<String, Value> {
        self.data.as_object().cloned().unwrap_or_default()
    }
}

/// Encode a command as one newline-terminated JSON line.
///
/// `data` must serialize to a JSON object; `null` (e.g. `()` or `None`) is
/// sent as `{}`.
pub fn encode<T>(command: &str, data: &T) -> Result<Vec<u8>, LinkError>
where
    T: Serialize + ?Sized,
{
    let data = match serde_json::to_value(data) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(other) => {
            return Err(LinkError::Serialization {
                command: command.to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            })
        }
        Err(e) => {
            return Err(LinkError::Serialization {
                command: command.to_string(),
                reason: e.to_string(),
            })
        }
    };

    let message = OutboundMessage {
        command: command.to_string(),
        data,
        timestamp: unix_timestamp(),
    };

    let mut bytes = serde_json::to_vec(&message).map_err(|e| LinkError::Serialization {
        command: command.to_string(),
        reason: e.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Split a buffer into complete JSON lines.
///
/// Returns the parsed messages and the trailing fragment that has not seen
/// its newline yet. Lines that fail to parse are logged and dropped.
pub fn decode(buffer: &[u8]) -> (Vec<Value>, Vec<u8>) {
    let mut messages = Vec::new();
    let mut rest = buffer;

    while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
        messages.extend(parse_line(&rest[..pos]));
        rest = &rest[pos + 1..];
    }

    (messages, rest.to_vec())
}

/// Carries the unterminated remainder from one read to the next.
///
/// Only the new bytes of each read are scanned for newlines. A line that
/// grows past the length limit is dropped up to its newline.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed freshly read bytes and take every message they complete
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.len() + head.len() > self.max_line {
                self.pending.clear();
                self.report_oversized();
                continue;
            }

            if self.pending.is_empty() {
                messages.extend(parse_line(head));
            } else {
                self.pending.extend_from_slice(head);
                messages.extend(parse_line(&self.pending));
                self.pending.clear();
            }
        }

        if !self.discarding {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > self.max_line {
                self.pending.clear();
                self.discarding = true;
                self.report_oversized();
            }
        }
        messages
    }

    /// Bytes still waiting for a newline
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    fn report_oversized(&self) {
        let err = LinkError::LineTooLong {
            limit: self.max_line,
        };
        warn!(%err, "dropping inbound line");
    }
}

/// Parse one line without its newline; blank lines yield nothing
fn parse_line(line: &[u8]) -> Option<Value> {
    let line = trim_line(line);
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            let err = LinkError::Protocol(e);
            debug!(%err, line = %String::from_utf8_lossy(line), "dropping inbound line");
            None
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &line[start..end]
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
