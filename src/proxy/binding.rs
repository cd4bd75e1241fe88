// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine-owned binding between a descriptor, its topics and its state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::capability::DeviceDescriptor;
use crate::state::StateSnapshot;
use crate::sync::{DeviceTopics, SyncState, TopicScheme};

/// Everything the engine keeps for one generation of one device.
///
/// A binding is created by [`generate`] and owned by the engine. Proxies
/// only hold a `Weak` reference to it, so dropping or retiring the binding
/// invalidates every proxy generated from it. Only the engine publishes
/// snapshots and state changes; any thread may read them.
#[derive(Debug)]
pub struct ProxyBinding {
    descriptor: Arc<DeviceDescriptor>,
    epoch: u64,
    topics: DeviceTopics,
    snapshot: RwLock<Arc<StateSnapshot>>,
    sync_state: RwLock<SyncState>,
    available: RwLock<Option<bool>>,
    /// Capabilities automation code has read or written.
    tracked: Mutex<BTreeSet<String>>,
    retired: AtomicBool,
}

/// Builds the binding for a descriptor.
///
/// `epoch` identifies this generation; commands carrying another epoch are
/// ignored by the engine. The binding starts `Unsynced` with an empty
/// snapshot.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use z2m_lib::capability::{Access, Capability, DeviceDescriptor};
/// use z2m_lib::proxy::generate;
/// use z2m_lib::sync::{SyncState, TopicScheme};
///
/// let plug = DeviceDescriptor::new("0x01", "plug", vec![
///     Capability::binary("state", Access::ALL),
/// ]).unwrap();
///
/// let binding = generate(Arc::new(plug), 1, &TopicScheme::default());
/// assert_eq!(binding.topics().set, "zigbee2mqtt/plug/set");
/// assert_eq!(binding.sync_state(), SyncState::Unsynced);
/// assert!(binding.snapshot().get("state").is_none());
/// ```
#[must_use]
pub fn generate(
    descriptor: Arc<DeviceDescriptor>,
    epoch: u64,
    topics: &TopicScheme,
) -> Arc<ProxyBinding> {
    let snapshot = StateSnapshot::empty(descriptor.id().clone(), descriptor.friendly_name());
    Arc::new(ProxyBinding {
        topics: topics.device(descriptor.friendly_name()),
        descriptor,
        epoch,
        snapshot: RwLock::new(Arc::new(snapshot)),
        sync_state: RwLock::new(SyncState::Unsynced),
        available: RwLock::new(None),
        tracked: Mutex::new(BTreeSet::new()),
        retired: AtomicBool::new(false),
    })
}

impl ProxyBinding {
    /// The descriptor this binding was generated from.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Generation number.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Topics of the device.
    #[must_use]
    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.snapshot.read().clone()
    }

    /// Current synchronization state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        *self.sync_state.read()
    }

    /// Availability reported by the bridge, if any.
    #[must_use]
    pub fn availability(&self) -> Option<bool> {
        *self.available.read()
    }

    /// Returns `true` once the binding was retired by a replacement or
    /// removal.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Capabilities automation code has read or written.
    #[must_use]
    pub fn tracked(&self) -> Vec<String> {
        self.tracked.lock().iter().cloned().collect()
    }

    /// Returns `true` if every tracked capability has a known value.
    #[must_use]
    pub fn tracked_known(&self) -> bool {
        let snapshot = self.snapshot();
        self.tracked.lock().iter().all(|c| snapshot.contains(c))
    }

    pub(crate) fn track(&self, capability: &str) {
        let mut tracked = self.tracked.lock();
        if !tracked.contains(capability) {
            tracked.insert(capability.to_string());
        }
    }

    pub(crate) fn publish_snapshot(&self, snapshot: Arc<StateSnapshot>) {
        *self.snapshot.write() = snapshot;
    }

    /// Returns `true` if the state changed.
    pub(crate) fn set_sync_state(&self, state: SyncState) -> bool {
        let mut current = self.sync_state.write();
        if *current == state {
            return false;
        }
        *current = state;
        true
    }

    /// Returns `true` if the availability changed.
    pub(crate) fn set_availability(&self, available: bool) -> bool {
        self.available.write().replace(available) != Some(available)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}
