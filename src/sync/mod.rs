// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synchronization engine.
//!
//! A [`SyncEngine`] runs as a single tokio task that owns the
//! [`StateCache`](crate::state::StateCache) and reacts to one queue of
//! commands: broker messages, proxy writes and its own timers. Because
//! every mutation happens on that task, applies for one device are strictly
//! ordered and callbacks observe them in that order.
//!
//! # Lifecycle of a write
//!
//! 1. [`DeviceProxy::set`](crate::proxy::DeviceProxy::set) validates the
//!    value and queues it.
//! 2. The engine records a pending write and waits for the debounce window;
//!    later writes to the same capability inside the window replace it.
//! 3. The last value is published on `<base>/<friendly_name>/set`.
//! 4. A state payload satisfying the value confirms the write. Otherwise the
//!    publish is repeated with exponential backoff until the retry budget is
//!    spent, at which point a [`WriteFailure`] is reported once and the
//!    device becomes [`SyncState::Stale`].

mod command;
mod config;
mod devices;
mod engine;
mod handle;
mod topics;

use std::fmt;

pub(crate) use command::Command;
pub use config::{DEFAULT_BASE_TOPIC, RetryPolicy, SyncConfig};
pub use engine::SyncEngine;
pub use handle::SyncHandle;
pub use topics::{DeviceTopics, Route, TopicScheme};

use crate::capability::Value;
use crate::event::DeviceId;

/// How far a device's cached state can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Nothing has been received since the binding was created or the
    /// broker reconnected.
    Unsynced,
    /// Some values are known, or a write is in flight.
    Syncing,
    /// Every capability automation code depends on has a value.
    Synced,
    /// A write failed or the descriptor was replaced.
    Stale,
}

impl SyncState {
    /// Returns `true` in [`SyncState::Synced`].
    #[must_use]
    pub fn is_synced(self) -> bool {
        self == Self::Synced
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unsynced => "unsynced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// A write the device never confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    /// The device written to.
    pub device: DeviceId,
    /// Its friendly name.
    pub friendly_name: String,
    /// The capability written to.
    pub capability: String,
    /// The value that was requested.
    pub value: Value,
    /// How many times it was published.
    pub attempts: u32,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} = {} unconfirmed after {} attempts",
            self.friendly_name, self.capability, self.value, self.attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_display() {
        assert_eq!(SyncState::Unsynced.to_string(), "unsynced");
        assert_eq!(SyncState::Stale.to_string(), "stale");
        assert!(SyncState::Synced.is_synced());
        assert!(!SyncState::Syncing.is_synced());
    }

    #[test]
    fn write_failure_display() {
        let failure = WriteFailure {
            device: DeviceId::new("0x01"),
            friendly_name: "lamp".to_string(),
            capability: "state".to_string(),
            value: Value::Bool(true),
            attempts: 3,
        };
        assert_eq!(failure.to_string(), "lamp.state = true unconfirmed after 3 attempts");
    }
}
