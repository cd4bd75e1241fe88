// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Change notifications delivered to automation callbacks.

use std::sync::Arc;

use super::StateSnapshot;
use crate::capability::Value;
use crate::event::DeviceId;

/// One capability value that was applied to the cache.
///
/// A change is produced when the stored value differs from the previous one
/// or when it confirms a pending write. `changed == false` with
/// `confirmed == true` means the device acknowledged a write of the value it
/// already had.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// The device.
    pub device: DeviceId,
    /// Friendly name of the device.
    pub friendly_name: String,
    /// The capability whose value was applied.
    pub capability: String,
    /// The applied value.
    pub value: Value,
    /// The value before the apply, if one was known.
    pub previous: Option<Value>,
    /// The stored value differs from `previous`.
    pub changed: bool,
    /// The value confirmed a pending write.
    pub confirmed: bool,
    /// The device snapshot right after the apply.
    pub snapshot: Arc<StateSnapshot>,
}

impl StateChange {
    /// Returns the value as a boolean, for binary capabilities.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Returns the value as a number, for numeric capabilities.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Returns the value as text, for enumerated and text capabilities.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Returns `true` if the change was caused by someone other than this
    /// process (a wall switch, another controller).
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.changed && !self.confirmed
    }
}
