// JSON hub protocol framing
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RECORD_SEPARATOR: u8 = 0x1E;

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Transport names as advertised by the negotiate endpoint
pub const SSE_TRANSPORT: &str = "ServerSentEvents";
pub const LONG_POLLING_TRANSPORT: &str = "LongPolling";

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items, cancellations and future message types
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: Option<String>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

pub fn parse_message(frame: &str) -> Result<HubMessage, String> {
    let raw: RawMessage = serde_json::from_str(frame).map_err(|e| e.to_string())?;
    let message = match raw.kind {
        INVOCATION => HubMessage::Invocation {
            invocation_id: raw.invocation_id,
            target: raw.target.ok_or("invocation without target")?,
            arguments: raw.arguments,
        },
        COMPLETION => HubMessage::Completion {
            invocation_id: raw.invocation_id.ok_or("completion without invocationId")?,
            result: raw.result,
            error: raw.error,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// The first frame the server sends: `{}` or `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

pub fn parse_handshake_response(frame: &str) -> Result<(), String> {
    let response: HandshakeResponse =
        serde_json::from_str(frame).map_err(|e| format!("bad handshake response: {}", e))?;
    match response.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn frame(value: &impl Serialize) -> String {
    let mut text = serde_json::to_string(value).unwrap_or_default();
    text.push(RECORD_SEPARATOR as char);
    text
}

pub fn handshake_request() -> String {
    frame(&serde_json::json!({ "protocol": "json", "version": 1 }))
}

pub fn invocation(invocation_id: &str, target: &str, arguments: &[Value]) -> String {
    frame(&serde_json::json!({
        "type": INVOCATION,
        "invocationId": invocation_id,
        "target": target,
        "arguments": arguments,
    }))
}

pub fn ping() -> String {
    frame(&serde_json::json!({ "type": PING }))
}

/// Accumulates transport payloads and splits them into complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame, without its separator
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|b| *b == RECORD_SEPARATOR)?;
            let frame = self.buffer.split_to(end);
            self.buffer.advance(1);
            let text = String::from_utf8_lossy(&frame).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
}

/// Incremental parser for a `text/event-stream` body. Yields the `data`
/// payload of each completed event; comments and other fields are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    /// Present from negotiate version 1; older servers only send the id
    pub connection_token: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    pub error: Option<String>,
}

impl NegotiateResponse {
    pub fn token(&self) -> Option<&str> {
        self.connection_token
            .as_deref()
            .or(self.connection_id.as_deref())
    }

    pub fn supports(&self, transport: &str) -> bool {
        self.available_transports.iter().any(|t| {
            t.transport == transport && t.transfer_formats.iter().any(|f| f == "Text")
        })
    }
}
