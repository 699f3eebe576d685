//! Entity state snapshots and state-change events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────
// Entity State
// ─────────────────────────────────────────────────────────────────

/// Immutable snapshot of one entity as reported by the hub
///
/// Snapshots are never mutated; a later `state_changed` event carries a
/// fresh snapshot that supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Stable entity identifier (e.g., "sensor.outdoor_temperature")
    pub entity_id: String,

    /// Current state rendered as text
    pub state: String,

    /// Free-form attributes (unit, friendly name, ...)
    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// When the state value last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,

    /// When the state or any attribute last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// Origin context of the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<StateContext>,
}

/// Context attached to a state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateContext {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl EntityState {
    /// Domain part of the entity id ("light" for "light.kitchen")
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    /// Look up a single attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Human-readable name, falling back to the entity id
    pub fn friendly_name(&self) -> &str {
        self.attribute("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    /// Unit of measurement, if the entity reports one
    pub fn unit(&self) -> Option<&str> {
        self.attribute("unit_of_measurement").and_then(Value::as_str)
    }

    /// State parsed as a number, if it is one
    pub fn numeric_state(&self) -> Option<f64> {
        self.state.parse().ok()
    }

    /// Whether the hub currently cannot reach the device
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown")
    }
}

// ─────────────────────────────────────────────────────────────────
// State Change Events
// ─────────────────────────────────────────────────────────────────

/// Raw `data` payload of a `state_changed` event
///
/// `new_state` is null when the entity was removed.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedData {
    pub entity_id: String,
    #[serde(default)]
    pub new_state: Option<EntityState>,
    #[serde(default)]
    pub old_state: Option<EntityState>,
}

impl StateChangedData {
    /// Convert into a deliverable event; removals yield `None`
    pub fn into_event(self) -> Option<StateChangeEvent> {
        let new_state = self.new_state?;
        Some(StateChangeEvent {
            entity_id: self.entity_id,
            new_state,
            old_state: self.old_state,
        })
    }
}

/// A state change delivered to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChangeEvent {
    pub entity_id: String,
    pub new_state: EntityState,
    pub old_state: Option<EntityState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_snapshot_parses() {
        let state: EntityState =
            serde_json::from_value(json!({"entity_id": "sensor.x", "state": "5"})).unwrap();
        assert_eq!(state.entity_id, "sensor.x");
        assert_eq!(state.state, "5");
        assert!(state.attributes.is_empty());
        assert!(state.last_changed.is_none());
        assert_eq!(state.numeric_state(), Some(5.0));
    }

    #[test]
    fn test_full_snapshot_parses() {
        let state: EntityState = serde_json::from_value(json!({
            "entity_id": "light.kitchen",
            "state": "on",
            "attributes": {"friendly_name": "Kitchen", "brightness": 200},
            "last_changed": "2024-03-01T10:00:00.123456+00:00",
            "last_updated": "2024-03-01T10:05:00+00:00",
            "context": {"id": "01HQ", "parent_id": null, "user_id": null}
        }))
        .unwrap();

        assert_eq!(state.domain(), "light");
        assert_eq!(state.friendly_name(), "Kitchen");
        assert_eq!(state.attribute("brightness"), Some(&json!(200)));
        assert!(state.last_changed.unwrap() < state.last_updated.unwrap());
        assert_eq!(state.context.unwrap().id, "01HQ");
    }

    #[test]
    fn test_unavailable() {
        let state: EntityState =
            serde_json::from_value(json!({"entity_id": "switch.fan", "state": "unavailable"}))
                .unwrap();
        assert!(state.is_unavailable());
        assert_eq!(state.friendly_name(), "switch.fan");
        assert!(state.numeric_state().is_none());
    }

    #[test]
    fn test_removal_is_not_an_event() {
        let data: StateChangedData = serde_json::from_value(json!({
            "entity_id": "sensor.gone",
            "new_state": null,
            "old_state": {"entity_id": "sensor.gone", "state": "1"}
        }))
        .unwrap();
        assert!(data.into_event().is_none());
    }

    #[test]
    fn test_change_becomes_event() {
        let data: StateChangedData = serde_json::from_value(json!({
            "entity_id": "sensor.x",
            "new_state": {"entity_id": "sensor.x", "state": "6"},
            "old_state": {"entity_id": "sensor.x", "state": "5"}
        }))
        .unwrap();
        let event = data.into_event().unwrap();
        assert_eq!(event.new_state.state, "6");
        assert_eq!(event.old_state.unwrap().state, "5");
    }
}
