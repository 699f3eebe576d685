//! State history rows
//!
//! `history/history_during_period` answers with a compressed row format:
//! `s` (state), `a` (attributes), `lu` (last updated) and `lc` (last
//! changed, omitted when equal to `lu`), both as epoch seconds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One historical snapshot of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    /// State rendered as text
    #[serde(rename = "s")]
    pub state: String,

    /// Attributes; only the first row carries them under minimal responses
    #[serde(rename = "a", default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,

    /// Epoch seconds of the last update
    #[serde(rename = "lu", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,

    /// Epoch seconds of the last state change
    #[serde(rename = "lc", default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<f64>,
}

impl HistoryState {
    /// When this row was recorded
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated.and_then(epoch_seconds)
    }

    /// When the state value changed, falling back to the update time
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.last_changed
            .or(self.last_updated)
            .and_then(epoch_seconds)
    }

    /// State parsed as a number, if it is one
    pub fn numeric_state(&self) -> Option<f64> {
        self.state.parse().ok()
    }
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compressed_row() {
        let row: HistoryState = serde_json::from_value(json!({
            "s": "21.4",
            "a": {"unit_of_measurement": "°C"},
            "lu": 1709287200.5
        }))
        .unwrap();

        assert_eq!(row.numeric_state(), Some(21.4));
        assert_eq!(row.attributes["unit_of_measurement"], json!("°C"));
        assert_eq!(row.updated_at().unwrap().timestamp_millis(), 1_709_287_200_500);
        assert_eq!(row.changed_at(), row.updated_at());
    }

    #[test]
    fn test_minimal_row_without_attributes() {
        let row: HistoryState =
            serde_json::from_value(json!({"s": "off", "lu": 1709287200.0, "lc": 1709280000.0}))
                .unwrap();

        assert!(row.attributes.is_empty());
        assert!(row.changed_at().unwrap() < row.updated_at().unwrap());
    }
}
