//! Outbound protocol messages
//!
//! Commands are serialized as `{"id": <n>, "type": <name>, ...fields}`.
//! The `auth` message is the only outbound frame without an id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::types::{StatisticType, StatisticsPeriod, DEFAULT_STATISTIC_TYPES};

/// Event type of the standing subscription
pub const STATE_CHANGED: &str = "state_changed";

// ─────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────

/// Reply to `auth_required`
#[derive(Clone, Serialize)]
#[serde(tag = "type", rename = "auth")]
pub struct AuthMessage {
    pub access_token: String,
}

impl AuthMessage {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Keep tokens out of logs
impl fmt::Debug for AuthMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMessage")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────

/// Every command the client issues through the correlator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Snapshot of every entity
    #[serde(rename = "get_states")]
    GetStates,

    /// Invoke a service
    #[serde(rename = "call_service")]
    CallService {
        domain: String,
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        service_data: Option<Value>,
    },

    /// Standing event subscription
    #[serde(rename = "subscribe_events")]
    SubscribeEvents { event_type: String },

    /// Aggregated long-term statistics
    #[serde(rename = "recorder/statistics_during_period")]
    StatisticsDuringPeriod {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        statistic_ids: Vec<String>,
        period: StatisticsPeriod,
        types: Vec<StatisticType>,
    },

    /// Raw state history
    #[serde(rename = "history/history_during_period")]
    HistoryDuringPeriod {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        entity_ids: Vec<String>,
        minimal_response: bool,
        significant_changes_only: bool,
    },

    /// Liveness probe, answered with `pong`
    #[serde(rename = "ping")]
    Ping,
}

impl Command {
    /// Get the command type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::GetStates => "get_states",
            Command::CallService { .. } => "call_service",
            Command::SubscribeEvents { .. } => "subscribe_events",
            Command::StatisticsDuringPeriod { .. } => "recorder/statistics_during_period",
            Command::HistoryDuringPeriod { .. } => "history/history_during_period",
            Command::Ping => "ping",
        }
    }

    pub fn call_service(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: Option<Value>,
    ) -> Self {
        Command::CallService {
            domain: domain.into(),
            service: service.into(),
            service_data,
        }
    }

    pub fn subscribe_state_changed() -> Self {
        Command::SubscribeEvents {
            event_type: STATE_CHANGED.to_string(),
        }
    }

    pub fn statistics(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        statistic_ids: Vec<String>,
        period: StatisticsPeriod,
    ) -> Self {
        Command::StatisticsDuringPeriod {
            start_time,
            end_time,
            statistic_ids,
            period,
            types: DEFAULT_STATISTIC_TYPES.to_vec(),
        }
    }

    pub fn history(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        entity_ids: Vec<String>,
        minimal_response: bool,
    ) -> Self {
        Command::HistoryDuringPeriod {
            start_time,
            end_time,
            entity_ids,
            minimal_response,
            significant_changes_only: false,
        }
    }
}

/// A command stamped with its correlation id
#[derive(Debug, Serialize)]
pub struct CommandFrame<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub command: &'a Command,
}

impl<'a> CommandFrame<'a> {
    pub fn new(id: u64, command: &'a Command) -> Self {
        Self { id, command }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
