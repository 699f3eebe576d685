//! Long-term statistics types (recorder)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Statistics Period
// ─────────────────────────────────────────────────────────────────

/// Aggregation granularity for statistics queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticsPeriod {
    #[serde(rename = "5minute")]
    FiveMinute,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl StatisticsPeriod {
    /// Wire name of the period
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticsPeriod::FiveMinute => "5minute",
            StatisticsPeriod::Hour => "hour",
            StatisticsPeriod::Day => "day",
            StatisticsPeriod::Week => "week",
            StatisticsPeriod::Month => "month",
        }
    }
}

impl Default for StatisticsPeriod {
    fn default() -> Self {
        StatisticsPeriod::Hour
    }
}

impl fmt::Display for StatisticsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticsPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5minute" | "5min" | "five_minute" => Ok(StatisticsPeriod::FiveMinute),
            "hour" => Ok(StatisticsPeriod::Hour),
            "day" => Ok(StatisticsPeriod::Day),
            "week" => Ok(StatisticsPeriod::Week),
            "month" => Ok(StatisticsPeriod::Month),
            other => Err(format!(
                "invalid period '{}'; expected one of 5minute, hour, day, week, month",
                other
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Statistic Types
// ─────────────────────────────────────────────────────────────────

/// Which aggregates a statistics query should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticType {
    Change,
    LastReset,
    Max,
    Mean,
    Min,
    State,
    Sum,
}

/// Aggregates requested by `get_statistics`
pub const DEFAULT_STATISTIC_TYPES: [StatisticType; 6] = [
    StatisticType::Change,
    StatisticType::Max,
    StatisticType::Mean,
    StatisticType::Min,
    StatisticType::State,
    StatisticType::Sum,
];

// ─────────────────────────────────────────────────────────────────
// Statistic Rows
// ─────────────────────────────────────────────────────────────────

/// Point in time as reported by the recorder
///
/// Newer hubs send epoch milliseconds, older ones RFC 3339 strings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecorderTime {
    EpochMillis(f64),
    Iso(DateTime<Utc>),
}

impl RecorderTime {
    /// Normalize to a UTC timestamp
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match *self {
            RecorderTime::EpochMillis(ms) => Utc.timestamp_millis_opt(ms as i64).single(),
            RecorderTime::Iso(dt) => Some(dt),
        }
    }
}

/// One aggregated bucket of a statistic series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticValue {
    pub start: RecorderTime,
    pub end: RecorderTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset: Option<RecorderTime>,
}
