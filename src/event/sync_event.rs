// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization event types.

use crate::state::StateChange;
use crate::sync::{SyncState, WriteFailure};

use super::DeviceId;

/// Events emitted by the synchronization engine.
///
/// These events are broadcast to every receiver obtained from
/// [`SyncHandle::events`](crate::sync::SyncHandle::events). They mirror what
/// the automation callbacks see, plus device lifecycle and connection
/// changes that have no per-capability callback.
///
/// # Examples
///
/// ```
/// use z2m_lib::event::{DeviceId, SyncEvent};
///
/// let added = SyncEvent::DeviceAdded {
///     device: DeviceId::new("0x01"),
///     friendly_name: "hall_lamp".to_string(),
/// };
/// assert!(added.is_lifecycle());
/// ```
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The broker connection was established (or re-established).
    Connected,

    /// The broker connection was lost.
    Disconnected,

    /// The bridge reported itself online or offline.
    BridgeStateChanged {
        /// Whether the bridge is online.
        online: bool,
    },

    /// A device appeared in the bridge device list.
    DeviceAdded {
        /// The device.
        device: DeviceId,
        /// Its friendly name (and state topic suffix).
        friendly_name: String,
    },

    /// A device's descriptor was replaced; earlier proxies are stale.
    DeviceReplaced {
        /// The device.
        device: DeviceId,
        /// The friendly name of the new descriptor.
        friendly_name: String,
    },

    /// A device disappeared from the bridge device list.
    DeviceRemoved {
        /// The device.
        device: DeviceId,
    },

    /// A device descriptor in the bridge list could not be parsed.
    DescriptorRejected {
        /// The device, when its address could be read.
        device: Option<DeviceId>,
        /// Description of the parse failure.
        error: String,
    },

    /// A device moved between synchronization states.
    SyncStateChanged {
        /// The device.
        device: DeviceId,
        /// The new state.
        state: SyncState,
    },

    /// The bridge reported a device as available or unavailable.
    AvailabilityChanged {
        /// The device.
        device: DeviceId,
        /// Whether it is reachable.
        available: bool,
    },

    /// A capability value was applied to the cache.
    StateChanged(StateChange),

    /// A write could not be confirmed within the retry budget.
    WriteFailed(WriteFailure),
}

impl SyncEvent {
    /// Returns the device this event concerns, if any.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connected | Self::Disconnected | Self::BridgeStateChanged { .. } => None,
            Self::DescriptorRejected { device, .. } => device.as_ref(),
            Self::DeviceAdded { device, .. }
            | Self::DeviceReplaced { device, .. }
            | Self::DeviceRemoved { device }
            | Self::SyncStateChanged { device, .. }
            | Self::AvailabilityChanged { device, .. } => Some(device),
            Self::StateChanged(change) => Some(&change.device),
            Self::WriteFailed(failure) => Some(&failure.device),
        }
    }

    /// Returns `true` for device lifecycle events (added, replaced, removed).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::DeviceAdded { .. } | Self::DeviceReplaced { .. } | Self::DeviceRemoved { .. }
        )
    }

    /// Returns `true` for broker connection events.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }
}
