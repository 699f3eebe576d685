//! Inbound protocol messages
//!
//! Every frame the hub sends is a JSON object with a `type` discriminator.
//! Frames are decoded once, at the transport boundary, into [`Incoming`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────
// Message Types (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// All messages the hub may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incoming {
    // ─── Handshake ──────────────────────────────────────────────
    /// Hub asks for credentials
    AuthRequired(AuthRequired),

    /// Credentials accepted
    AuthOk(AuthOk),

    /// Credentials rejected
    AuthInvalid(AuthInvalid),

    // ─── Session ────────────────────────────────────────────────
    /// Answer to a command, matched by id
    Result(ResultMessage),

    /// Server-pushed event for a subscription
    Event(EventMessage),

    /// Answer to a `ping` command
    Pong(PongMessage),

    /// Any type this client does not understand
    #[serde(other)]
    Unknown,
}

impl Incoming {
    /// Get the message type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Incoming::AuthRequired(_) => "auth_required",
            Incoming::AuthOk(_) => "auth_ok",
            Incoming::AuthInvalid(_) => "auth_invalid",
            Incoming::Result(_) => "result",
            Incoming::Event(_) => "event",
            Incoming::Pong(_) => "pong",
            Incoming::Unknown => "unknown",
        }
    }

    /// Whether the message belongs to the login sequence
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Incoming::AuthRequired(_) | Incoming::AuthOk(_) | Incoming::AuthInvalid(_)
        )
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserialize from JSON bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ─────────────────────────────────────────────────────────────────
// Handshake Messages
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthRequired {
    #[serde(default)]
    pub ha_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthOk {
    #[serde(default)]
    pub ha_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthInvalid {
    #[serde(default)]
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────

/// Answer to one command
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

/// Error details of a failed command
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ResultMessage {
    /// Turn the wire result into the caller's outcome
    pub fn into_outcome(self) -> Result<Value, Error> {
        if self.success {
            return Ok(self.result.unwrap_or(Value::Null));
        }

        let error = self.error.unwrap_or_default();
        let message = if error.message.is_empty() {
            "Unknown error".to_string()
        } else {
            error.message
        };
        Err(Error::Command {
            code: error.code,
            message,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PongMessage {
    pub id: u64,
}

// ─────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────

/// Event pushed for a subscription
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Id of the `subscribe_events` command that produced it
    #[serde(default)]
    pub id: Option<u64>,
    pub event: EventPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub time_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub origin: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
