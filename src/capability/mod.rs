// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability model for bridged devices.
//!
//! The bridge describes every device with an `exposes` document: a list of
//! binary switches, numeric ranges, enumerations, text fields, composites and
//! lists, optionally grouped under container types such as `light`. This
//! module turns that document into a closed set of [`Capability`] values,
//! resolved once at ingestion time, so that later code never inspects raw
//! JSON to decide how to treat a property.
//!
//! # Examples
//!
//! ```
//! use z2m_lib::capability::{AccessMode, DeviceDescriptor};
//! use z2m_lib::Value;
//! use serde_json::json;
//!
//! let raw = json!({
//!     "ieee_address": "0x00158d0001",
//!     "friendly_name": "hall_lamp",
//!     "definition": {
//!         "exposes": [
//!             {"type": "numeric", "property": "brightness", "access": 7,
//!              "value_min": 0, "value_max": 254}
//!         ]
//!     }
//! });
//!
//! let lamp = DeviceDescriptor::parse(&raw).unwrap();
//! let brightness = lamp.capability("brightness").unwrap();
//! assert_eq!(brightness.access_mode(), AccessMode::ReadWrite);
//! assert!(brightness.validate(&Value::from(300)).is_err());
//! ```

mod descriptor;
mod kind;
mod value;

pub use descriptor::{DeviceDescriptor, parse_device_list};
pub use kind::{Access, AccessMode, Capability, CapabilityKind};
pub use value::Value;

/// Deepest composite or list nesting accepted in an exposes document.
pub const MAX_NESTING_DEPTH: usize = 4;
