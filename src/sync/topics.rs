// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge topic layout.

/// Topics of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    /// State payloads published by the bridge.
    pub state: String,
    /// Partial state objects to write.
    pub set: String,
    /// Query requests.
    pub get: String,
    /// Online/offline reports.
    pub availability: String,
}

/// What an incoming topic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// `<base>/bridge/devices`
    BridgeDevices,
    /// `<base>/bridge/state`
    BridgeState,
    /// Any other `<base>/bridge/...` topic.
    Bridge(&'a str),
    /// `<base>/<friendly_name>/availability`
    Availability(&'a str),
    /// `<base>/<friendly_name>/set` or `/get`, usually our own echo.
    Command(&'a str),
    /// `<base>/<friendly_name>`
    State(&'a str),
    /// Outside the base topic.
    Foreign,
}

/// Maps friendly names to topics under a base topic, and back.
///
/// # Examples
///
/// ```
/// use z2m_lib::sync::{Route, TopicScheme};
///
/// let topics = TopicScheme::new("zigbee2mqtt");
/// assert_eq!(topics.device("kitchen/lamp").set, "zigbee2mqtt/kitchen/lamp/set");
/// assert_eq!(topics.route("zigbee2mqtt/kitchen/lamp"), Route::State("kitchen/lamp"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl TopicScheme {
    /// Creates a scheme for a base topic; trailing slashes are ignored.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The base topic.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Topic carrying the device list.
    #[must_use]
    pub fn bridge_devices(&self) -> String {
        format!("{}/bridge/devices", self.base)
    }

    /// Topic carrying the bridge online state.
    #[must_use]
    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/state", self.base)
    }

    /// Topics of one device.
    #[must_use]
    pub fn device(&self, friendly_name: &str) -> DeviceTopics {
        let state = format!("{}/{friendly_name}", self.base);
        DeviceTopics {
            set: format!("{state}/set"),
            get: format!("{state}/get"),
            availability: format!("{state}/availability"),
            state,
        }
    }

    /// Classifies an incoming topic.
    #[must_use]
    pub fn route<'a>(&self, topic: &'a str) -> Route<'a> {
        let Some(rest) = topic
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Route::Foreign;
        };
        if rest.is_empty() {
            return Route::Foreign;
        }

        match rest {
            "bridge/devices" => return Route::BridgeDevices,
            "bridge/state" => return Route::BridgeState,
            _ => {}
        }
        if let Some(sub) = rest.strip_prefix("bridge/") {
            return Route::Bridge(sub);
        }
        if let Some(name) = rest.strip_suffix("/availability") {
            return Route::Availability(name);
        }
        if let Some(name) = rest
            .strip_suffix("/set")
            .or_else(|| rest.strip_suffix("/get"))
        {
            return Route::Command(name);
        }
        Route::State(rest)
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_BASE_TOPIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topics() {
        let topics = TopicScheme::default().device("plug");
        assert_eq!(topics.state, "zigbee2mqtt/plug");
        assert_eq!(topics.set, "zigbee2mqtt/plug/set");
        assert_eq!(topics.get, "zigbee2mqtt/plug/get");
        assert_eq!(topics.availability, "zigbee2mqtt/plug/availability");
    }

    #[test]
    fn bridge_topics() {
        let topics = TopicScheme::new("z2m/");
        assert_eq!(topics.base(), "z2m");
        assert_eq!(topics.bridge_devices(), "z2m/bridge/devices");
        assert_eq!(topics.bridge_state(), "z2m/bridge/state");
    }

    #[test]
    fn routes() {
        let topics = TopicScheme::default();
        assert_eq!(topics.route("zigbee2mqtt/bridge/devices"), Route::BridgeDevices);
        assert_eq!(topics.route("zigbee2mqtt/bridge/state"), Route::BridgeState);
        assert_eq!(topics.route("zigbee2mqtt/bridge/logging"), Route::Bridge("logging"));
        assert_eq!(
            topics.route("zigbee2mqtt/plug/availability"),
            Route::Availability("plug")
        );
        assert_eq!(topics.route("zigbee2mqtt/plug/set"), Route::Command("plug"));
        assert_eq!(topics.route("zigbee2mqtt/plug/get"), Route::Command("plug"));
        assert_eq!(topics.route("zigbee2mqtt/plug"), Route::State("plug"));
        assert_eq!(topics.route("zigbee2mqtt/room/plug"), Route::State("room/plug"));
    }

    #[test]
    fn foreign_topics() {
        let topics = TopicScheme::default();
        assert_eq!(topics.route("tele/plug/STATE"), Route::Foreign);
        assert_eq!(topics.route("zigbee2mqttx/plug"), Route::Foreign);
        assert_eq!(topics.route("zigbee2mqtt/"), Route::Foreign);
        assert_eq!(topics.route("zigbee2mqtt"), Route::Foreign);
    }
}
