// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifier type.

use std::borrow::Borrow;
use std::fmt;

/// Stable identity of a bridge device.
///
/// The bridge assigns every Zigbee device its IEEE address (for example
/// `0x00158d0001a2b3c4`). Unlike the friendly name, the address survives
/// renames, so it is used as the key for cached state and callbacks.
///
/// # Examples
///
/// ```
/// use z2m_lib::event::DeviceId;
///
/// let id = DeviceId::new("0x00158d0001a2b3c4");
/// assert_eq!(id.as_str(), "0x00158d0001a2b3c4");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier from an IEEE address.
    #[must_use]
    pub fn new(ieee_address: impl Into<String>) -> Self {
        Self(ieee_address.into())
    }

    /// Returns the IEEE address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality() {
        assert_eq!(DeviceId::new("0x01"), DeviceId::from("0x01"));
        assert_ne!(DeviceId::new("0x01"), DeviceId::new("0x02"));
    }

    #[test]
    fn debug_format() {
        let id = DeviceId::new("0x01");
        assert_eq!(format!("{id:?}"), "DeviceId(0x01)");
    }

    #[test]
    fn display_format() {
        let id = DeviceId::new("0x00158d0001a2b3c4");
        assert_eq!(id.to_string(), "0x00158d0001a2b3c4");
    }

    #[test]
    fn lookup_by_str() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(DeviceId::new("0x01"), 1);
        assert_eq!(map.get("0x01"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&DeviceId::new("0x01")).unwrap();
        assert_eq!(json, "\"0x01\"");
    }
}
