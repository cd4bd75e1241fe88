// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback registration for automation code.
//!
//! - [`SubscriptionId`] - Unique identifier for unsubscribing
//! - [`DeviceSelector`] - Which device a registration listens to
//! - [`CallbackRegistry`] - Registry storing callbacks in registration order

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::DispatchError;
use crate::event::DeviceId;
use crate::state::StateChange;
use crate::sync::WriteFailure;

/// Unique identifier for a registration.
///
/// Returned by every registration method and accepted by
/// [`CallbackRegistry::unsubscribe`]. Identifiers increase in registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Selects the device(s) a registration applies to.
///
/// A named selector matches either the IEEE address or the friendly name,
/// so registrations can be made before the device is known and survive a
/// descriptor replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    /// Every device.
    Any,
    /// The device with this IEEE address or friendly name.
    Named(String),
}

impl DeviceSelector {
    /// Returns `true` if the selector designates the given device.
    #[must_use]
    pub fn matches(&self, device: &DeviceId, friendly_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Named(name) => name == device.as_str() || name == friendly_name,
        }
    }
}

impl From<&str> for DeviceSelector {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for DeviceSelector {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<&DeviceId> for DeviceSelector {
    fn from(id: &DeviceId) -> Self {
        Self::Named(id.as_str().to_string())
    }
}

impl From<DeviceId> for DeviceSelector {
    fn from(id: DeviceId) -> Self {
        Self::from(&id)
    }
}

/// Error a callback may return to signal failure.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of automation callbacks.
pub type CallbackResult = Result<(), CallbackError>;

pub(crate) type ChangeCallback = Arc<dyn Fn(&StateChange) -> CallbackResult + Send + Sync>;

pub(crate) type FailureCallback = Arc<dyn Fn(&WriteFailure) -> CallbackResult + Send + Sync>;

pub(crate) type ErrorSink = Arc<dyn Fn(&DispatchError) + Send + Sync>;

struct Registration<C> {
    device: DeviceSelector,
    capability: Option<String>,
    callback: C,
}

impl<C> Registration<C> {
    fn matches(&self, device: &DeviceId, friendly_name: &str, capability: &str) -> bool {
        self.device.matches(device, friendly_name)
            && self.capability.as_deref().is_none_or(|c| c == capability)
    }
}

/// Registry for automation callbacks.
///
/// Callbacks are kept in registration order and looked up by the
/// dispatcher. Lookups copy the matching `Arc`s out of the lock, so a
/// callback may register or unsubscribe other callbacks while running.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    change_callbacks: RwLock<BTreeMap<SubscriptionId, Registration<ChangeCallback>>>,
    failure_callbacks: RwLock<BTreeMap<SubscriptionId, Registration<FailureCallback>>>,
    error_sinks: RwLock<BTreeMap<SubscriptionId, ErrorSink>>,
}

impl CallbackRegistry {
    /// Creates a new empty callback registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            change_callbacks: RwLock::new(BTreeMap::new()),
            failure_callbacks: RwLock::new(BTreeMap::new()),
            error_sinks: RwLock::new(BTreeMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a callback for value changes.
    ///
    /// With `capability == None` the callback hears about every capability
    /// of the selected device(s).
    pub fn on_change<F>(
        &self,
        device: impl Into<DeviceSelector>,
        capability: Option<&str>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&StateChange) -> CallbackResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.change_callbacks.write().insert(
            id,
            Registration {
                device: device.into(),
                capability: capability.map(str::to_string),
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Registers a callback for writes that could not be confirmed.
    pub fn on_write_failure<F>(
        &self,
        device: impl Into<DeviceSelector>,
        capability: Option<&str>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&WriteFailure) -> CallbackResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.failure_callbacks.write().insert(
            id,
            Registration {
                device: device.into(),
                capability: capability.map(str::to_string),
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Registers a sink receiving callback failures.
    ///
    /// While no sink is registered, failures are logged at error level.
    pub fn on_callback_error<F>(&self, sink: F) -> SubscriptionId
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.error_sinks.write().insert(id, Arc::new(sink));
        id
    }

    /// Unregisters a callback or sink by its subscription ID.
    ///
    /// Returns `true` if something was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        if self.change_callbacks.write().remove(&id).is_some() {
            return true;
        }
        if self.failure_callbacks.write().remove(&id).is_some() {
            return true;
        }
        self.error_sinks.write().remove(&id).is_some()
    }

    /// Clears all callbacks and sinks.
    pub fn clear(&self) {
        self.change_callbacks.write().clear();
        self.failure_callbacks.write().clear();
        self.error_sinks.write().clear();
    }

    pub(crate) fn change_callbacks_for(
        &self,
        change: &StateChange,
    ) -> Vec<(SubscriptionId, ChangeCallback)> {
        self.change_callbacks
            .read()
            .iter()
            .filter(|(_, r)| r.matches(&change.device, &change.friendly_name, &change.capability))
            .map(|(id, r)| (*id, Arc::clone(&r.callback)))
            .collect()
    }

    pub(crate) fn failure_callbacks_for(
        &self,
        failure: &WriteFailure,
    ) -> Vec<(SubscriptionId, FailureCallback)> {
        self.failure_callbacks
            .read()
            .iter()
            .filter(|(_, r)| {
                r.matches(&failure.device, &failure.friendly_name, &failure.capability)
            })
            .map(|(id, r)| (*id, Arc::clone(&r.callback)))
            .collect()
    }

    pub(crate) fn error_sinks(&self) -> Vec<ErrorSink> {
        self.error_sinks.read().values().cloned().collect()
    }

    /// Returns the total number of registered callbacks and sinks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.change_callbacks.read().len()
            + self.failure_callbacks.read().len()
            + self.error_sinks.read().len()
    }

    /// Returns `true` if there are no registered callbacks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callback_count() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callback_count", &self.callback_count())
            .finish()
    }
}
