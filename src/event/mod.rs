// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event stream for synchronization activity.
//!
//! The [`EventBus`] uses tokio's broadcast channel so that any number of
//! observers (a dashboard, a logger, a test) can follow what the engine is
//! doing without registering per-capability callbacks.
//!
//! # Examples
//!
//! ```
//! use z2m_lib::event::{DeviceId, EventBus, SyncEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(SyncEvent::DeviceRemoved { device: DeviceId::new("0x01") });
//! ```

mod device_id;
mod event_bus;
mod sync_event;

pub use device_id::DeviceId;
pub use event_bus::EventBus;
pub(crate) use event_bus::DEFAULT_EVENT_CAPACITY;
pub use sync_event::SyncEvent;
