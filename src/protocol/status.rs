//! Interpretation of device status payloads.

use serde_json::Value;

use super::{AdapterError, ProtocolKind};

/// The subset of a device status the arbiter cares about.
///
/// `None` means the payload did not carry the field, in which case the
/// previously known value stays in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub locked: Option<bool>,
    pub active: Option<bool>,
}

impl StatusReport {
    /// Parse a raw status body for the given convention.
    pub fn parse(kind: ProtocolKind, body: &[u8]) -> Result<Self, AdapterError> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|e| AdapterError::Malformed(e.to_string()))?;
        Self::from_payload(kind, &payload)
    }

    /// Interpret an already-decoded payload.
    ///
    /// Rules, in order: a boolean `locked` sets the lock flag; a string
    /// `state` sets active to `state == "playing"`; a boolean `active`
    /// overrides whatever `state` said.
    pub fn from_payload(kind: ProtocolKind, payload: &Value) -> Result<Self, AdapterError> {
        let mut obj = payload
            .as_object()
            .ok_or_else(|| AdapterError::Malformed("expected a JSON object".to_string()))?;

        if kind.unwraps_data() {
            if let Some(data) = obj.get("data").and_then(Value::as_object) {
                obj = data;
            }
        }

        let locked = obj.get("locked").and_then(Value::as_bool);

        let mut active = obj
            .get("state")
            .and_then(Value::as_str)
            .map(|state| state == "playing");
        if let Some(a) = obj.get("active").and_then(Value::as_bool) {
            active = Some(a);
        }

        Ok(Self { locked, active })
    }

    /// Merge into previously known flags.
    pub fn apply_to(&self, locked: &mut bool, active: &mut bool) {
        if let Some(l) = self.locked {
            *locked = l;
        }
        if let Some(a) = self.active {
            *active = a;
        }
    }
}
