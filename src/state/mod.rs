// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state management types.
//!
//! The [`StateCache`] maps each device to its latest [`StateSnapshot`] and
//! tracks at most one [`PendingWrite`] per capability. It is owned by the
//! synchronization engine; everything else sees immutable snapshots.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use z2m_lib::capability::{Access, Capability, DeviceDescriptor};
//! use z2m_lib::state::{ApplyOutcome, StateCache};
//! use z2m_lib::event::DeviceId;
//! use z2m_lib::Value;
//!
//! let sensor = DeviceDescriptor::new("0x02", "sensor", vec![
//!     Capability::numeric("temperature", Access::PUBLISHED, None, None),
//! ]).unwrap();
//!
//! let mut cache = StateCache::default();
//! cache.register(Arc::new(sensor));
//!
//! let id = DeviceId::new("0x02");
//! cache.apply(&id, "temperature", Value::from(21.5));
//! let again = cache.apply(&id, "temperature", Value::from(21.5));
//!
//! // Repeating a value is a no-op
//! assert!(!again.should_notify());
//! ```

mod cache;
mod change;
mod snapshot;

pub use cache::{
    ApplyOutcome, ConflictPolicy, PendingWrite, RejectReason, StateCache, WriteIntent,
};
pub use change::StateChange;
pub use snapshot::StateSnapshot;
