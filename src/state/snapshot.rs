// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Immutable per-device state snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capability::Value;
use crate::event::DeviceId;

/// Latest known values of one device at one point in time.
///
/// Snapshots are never modified. Every effective change in the cache
/// produces a new snapshot with a higher [`sequence`](Self::sequence), shared
/// behind an `Arc`, so readers can hold on to one without blocking the
/// engine.
///
/// Snapshots serialize to JSON for status dashboards:
///
/// ```
/// use z2m_lib::state::StateSnapshot;
/// use z2m_lib::event::DeviceId;
///
/// let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "plug");
/// let json = serde_json::to_value(&snapshot).unwrap();
/// assert_eq!(json["friendly_name"], "plug");
/// assert_eq!(json["sequence"], 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    device: DeviceId,
    friendly_name: String,
    sequence: u64,
    values: BTreeMap<String, Value>,
    stale: BTreeSet<String>,
    updated_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Creates a snapshot with no known values.
    #[must_use]
    pub fn empty(device: DeviceId, friendly_name: impl Into<String>) -> Self {
        Self {
            device,
            friendly_name: friendly_name.into(),
            sequence: 0,
            values: BTreeMap::new(),
            stale: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// The device this snapshot belongs to.
    #[must_use]
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Friendly name of the device when the snapshot was taken.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Monotonically increasing change counter; 0 for the empty snapshot.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the value of a capability, or `None` while it is unknown.
    #[must_use]
    pub fn get(&self, capability: &str) -> Option<&Value> {
        self.values.get(capability)
    }

    /// Returns `true` if the capability has a known value.
    #[must_use]
    pub fn contains(&self, capability: &str) -> bool {
        self.values.contains_key(capability)
    }

    /// All known values.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Returns `true` if a write to this capability went unconfirmed and the
    /// value may not reflect the device.
    #[must_use]
    pub fn is_stale(&self, capability: &str) -> bool {
        self.stale.contains(capability)
    }

    /// Capabilities currently flagged stale.
    pub fn stale_capabilities(&self) -> impl Iterator<Item = &str> {
        self.stale.iter().map(String::as_str)
    }

    /// When this snapshot was produced.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn with_value(&self, capability: &str, value: Value) -> Self {
        let mut next = self.successor();
        next.stale.remove(capability);
        next.values.insert(capability.to_string(), value);
        next
    }

    pub(crate) fn with_stale(&self, capability: &str) -> Self {
        let mut next = self.successor();
        next.stale.insert(capability.to_string());
        next
    }

    fn successor(&self) -> Self {
        Self {
            device: self.device.clone(),
            friendly_name: self.friendly_name.clone(),
            sequence: self.sequence + 1,
            values: self.values.clone(),
            stale: self.stale.clone(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_snapshot_knows_nothing() {
        let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "plug");
        assert_eq!(snapshot.sequence(), 0);
        assert!(snapshot.get("state").is_none());
        assert!(snapshot.values().is_empty());
    }

    #[test]
    fn with_value_bumps_sequence() {
        let empty = StateSnapshot::empty(DeviceId::new("0x01"), "plug");
        let next = empty.with_value("state", Value::Bool(true));

        assert_eq!(next.sequence(), 1);
        assert_eq!(next.get("state"), Some(&Value::Bool(true)));
        assert!(empty.get("state").is_none());
    }

    #[test]
    fn new_value_clears_stale_flag() {
        let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "plug")
            .with_value("state", Value::Bool(true))
            .with_stale("state");
        assert!(snapshot.is_stale("state"));
        assert_eq!(snapshot.stale_capabilities().collect::<Vec<_>>(), ["state"]);

        let refreshed = snapshot.with_value("state", Value::Bool(false));
        assert!(!refreshed.is_stale("state"));
        assert_eq!(refreshed.sequence(), 3);
    }

    #[test]
    fn serializes_values_and_stale_set() {
        let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "plug")
            .with_value("brightness", Value::from(128))
            .with_stale("brightness");
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["device"], "0x01");
        assert_eq!(json["values"]["brightness"], json!(128));
        assert_eq!(json["stale"][0], "brightness");
        assert!(json["updated_at"].is_string());
    }
}
