use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// --- Message Types ---

/// Well-known values of [`Envelope::kind`].
pub mod message_types {
    // Protocol control
    pub const PONG: &str = "pong";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const ERROR: &str = "error";

    // Domain events
    pub const AGENT_STATUS: &str = "agent:status";
    pub const TASK_UPDATE: &str = "task:update";
    pub const MESSAGE_NEW: &str = "message:new";
    pub const PIPELINE_UPDATE: &str = "pipeline:update";
    pub const ALERT_NEW: &str = "alert:new";
}

/// Current UTC time as an RFC 3339 string with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// --- Wire Envelope ---

/// The unit exchanged over the socket.
///
/// Only `type` is mandatory when decoding; `payload` defaults to `null` and
/// `timestamp` to an empty string so that terse control replies such as
/// `{"type":"pong"}` still parse.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    /// Builds an outbound envelope stamped with the current time and a fresh id.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            payload,
            timestamp: timestamp_now(),
            id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Parses a text frame. Anything that is not a JSON object with a string
    /// `type` is rejected.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Deserializes the payload into a caller-defined type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_pong(&self) -> bool {
        self.kind == message_types::PONG
    }
}

// --- Control Frames ---

/// Control frames sent by the client.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping { timestamp: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl ControlFrame {
    pub fn ping() -> Self {
        ControlFrame::Ping {
            timestamp: timestamp_now(),
        }
    }

    pub fn subscribe(channel: &str) -> Self {
        ControlFrame::Subscribe {
            channel: channel.to_string(),
        }
    }

    pub fn unsubscribe(channel: &str) -> Self {
        ControlFrame::Unsubscribe {
            channel: channel.to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// --- Connection State ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Why the client is (or last was) in [`ConnectionState::Disconnected`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `connect()` has not been called yet.
    Idle,
    /// The caller invoked `disconnect()`.
    ClientRequested,
    /// Automatic reconnection gave up.
    RetriesExhausted { attempts: u32 },
}
