// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Automation-facing device handle.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Accessor, Binary, CapabilityType, Composite, Enumerated, List, Numeric, ProxyBinding, Text};
use crate::capability::{Capability, DeviceDescriptor, Value};
use crate::error::{Error, Result, StaleProxyError, ValidationError};
use crate::event::DeviceId;
use crate::state::StateSnapshot;
use crate::sync::{Command, SyncState};

/// Typed view of one device for automation code.
///
/// A proxy is a cheap, cloneable, non-owning handle. Reads come from the
/// latest snapshot without touching the engine. Writes are validated on
/// the spot and queued; they return before anything is published.
///
/// When the bridge replaces the device's descriptor (rename, re-interview,
/// firmware change) or removes the device, every call fails with
/// [`StaleProxyError`]; ask the [`SyncHandle`](crate::sync::SyncHandle) for a
/// fresh proxy.
#[derive(Debug, Clone)]
pub struct DeviceProxy {
    binding: Weak<ProxyBinding>,
    device: DeviceId,
    commands: mpsc::Sender<Command>,
}

impl DeviceProxy {
    pub(crate) fn new(binding: &Arc<ProxyBinding>, commands: mpsc::Sender<Command>) -> Self {
        Self {
            binding: Arc::downgrade(binding),
            device: binding.descriptor().id().clone(),
            commands,
        }
    }

    fn binding(&self) -> std::result::Result<Arc<ProxyBinding>, StaleProxyError> {
        self.binding
            .upgrade()
            .filter(|binding| !binding.is_retired())
            .ok_or_else(|| StaleProxyError {
                device: self.device.clone(),
            })
    }

    fn capability(binding: &ProxyBinding, name: &str) -> Result<Capability> {
        binding
            .descriptor()
            .capability(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownCapability(name.to_string()).into())
    }

    /// The device this proxy was generated for.
    #[must_use]
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Returns `true` once the proxy can no longer be used.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.binding().is_err()
    }

    /// The descriptor the proxy was generated from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced.
    pub fn descriptor(&self) -> Result<Arc<DeviceDescriptor>> {
        Ok(Arc::clone(self.binding()?.descriptor()))
    }

    /// The device's friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced.
    pub fn friendly_name(&self) -> Result<String> {
        Ok(self.binding()?.descriptor().friendly_name().to_string())
    }

    /// The latest snapshot of the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced.
    pub fn snapshot(&self) -> Result<Arc<StateSnapshot>> {
        Ok(self.binding()?.snapshot())
    }

    /// The device's synchronization state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced.
    pub fn sync_state(&self) -> Result<SyncState> {
        Ok(self.binding()?.sync_state())
    }

    /// Availability reported by the bridge, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced.
    pub fn availability(&self) -> Result<Option<bool>> {
        Ok(self.binding()?.availability())
    }

    /// Returns the last reconciled value, or `None` while unknown.
    ///
    /// Reading marks the capability as one the automation depends on; the
    /// device counts as synced only once all such capabilities are known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced, or a
    /// [`ValidationError`] if the capability is unknown or not readable.
    pub fn get(&self, capability: &str) -> Result<Option<Value>> {
        let binding = self.binding()?;
        let definition = Self::capability(&binding, capability)?;
        if !definition.is_readable() {
            return Err(ValidationError::NotReadable(capability.to_string()).into());
        }
        binding.track(capability);
        Ok(binding.snapshot().get(capability).cloned())
    }

    /// Requests a new value for a capability.
    ///
    /// The value is validated immediately; nothing is published for an
    /// invalid value. Valid values are handed to the engine, which debounces
    /// and publishes them on `<base>/<friendly_name>/set`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced, a
    /// [`ValidationError`] for an unknown, read-only or out-of-bounds write,
    /// [`Error::QueueFull`] if the engine is saturated, or
    /// [`Error::EngineStopped`] after shutdown.
    pub fn set(&self, capability: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let binding = self.binding()?;
        let definition = Self::capability(&binding, capability)?;
        if !definition.is_writable() {
            return Err(ValidationError::NotWritable(capability.to_string()).into());
        }
        definition.validate(&value)?;
        if definition.is_readable() {
            binding.track(capability);
        }

        tracing::debug!(
            device = %self.device,
            capability = %capability,
            value = %value,
            "Queueing write"
        );
        self.send(Command::Write {
            device: self.device.clone(),
            epoch: binding.epoch(),
            capability: capability.to_string(),
            value,
        })
    }

    /// Flips a binary capability using the device's toggle value.
    ///
    /// The toggle is published once on `/set`; the new value is known when
    /// the device reports it. A write still waiting for its debounce window
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced, a
    /// [`ValidationError`] if the capability is unknown, read-only, not binary
    /// or has no toggle value, [`Error::QueueFull`] or [`Error::EngineStopped`].
    pub fn toggle(&self, capability: &str) -> Result<()> {
        let binding = self.binding()?;
        let definition = Self::capability(&binding, capability)?;
        if !definition.is_writable() {
            return Err(ValidationError::NotWritable(capability.to_string()).into());
        }
        if !Binary::accepts(definition.kind()) {
            return Err(ValidationError::WrongKind {
                capability: capability.to_string(),
                expected: Binary::NAME,
                actual: definition.kind().name(),
            }
            .into());
        }
        if definition.value_toggle().is_none() {
            return Err(ValidationError::NotToggleable(capability.to_string()).into());
        }
        if definition.is_readable() {
            binding.track(capability);
        }

        tracing::debug!(device = %self.device, capability = %capability, "Queueing toggle");
        self.send(Command::Toggle {
            device: self.device.clone(),
            epoch: binding.epoch(),
            capability: capability.to_string(),
        })
    }

    /// Asks the device to report a capability through `/get`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced, a
    /// [`ValidationError`] if the capability is unknown or not queryable,
    /// [`Error::QueueFull`] or [`Error::EngineStopped`].
    pub fn query(&self, capability: &str) -> Result<()> {
        let binding = self.binding()?;
        let definition = Self::capability(&binding, capability)?;
        if !definition.is_queryable() {
            return Err(ValidationError::NotQueryable(capability.to_string()).into());
        }
        self.send(Command::Query {
            device: self.device.clone(),
            epoch: binding.epoch(),
            capability: Some(capability.to_string()),
        })
    }

    /// Asks the device to report every queryable capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced,
    /// [`Error::QueueFull`] or [`Error::EngineStopped`].
    pub fn query_all(&self) -> Result<()> {
        let binding = self.binding()?;
        self.send(Command::Query {
            device: self.device.clone(),
            epoch: binding.epoch(),
            capability: None,
        })
    }

    /// Returns a typed accessor for a capability of kind `K`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleProxy`] if the descriptor was replaced, or
    /// [`ValidationError::WrongKind`] if the capability has another kind.
    pub fn accessor<K: CapabilityType>(&self, capability: &str) -> Result<Accessor<K>> {
        let binding = self.binding()?;
        let definition = Self::capability(&binding, capability)?;
        if !K::accepts(definition.kind()) {
            return Err(ValidationError::WrongKind {
                capability: capability.to_string(),
                expected: K::NAME,
                actual: definition.kind().name(),
            }
            .into());
        }
        Ok(Accessor::new(self.clone(), capability))
    }

    /// Typed accessor for a binary capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn binary(&self, capability: &str) -> Result<Accessor<Binary>> {
        self.accessor(capability)
    }

    /// Typed accessor for a numeric capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn numeric(&self, capability: &str) -> Result<Accessor<Numeric>> {
        self.accessor(capability)
    }

    /// Typed accessor for an enumerated capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn enumerated(&self, capability: &str) -> Result<Accessor<Enumerated>> {
        self.accessor(capability)
    }

    /// Typed accessor for a text capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn text(&self, capability: &str) -> Result<Accessor<Text>> {
        self.accessor(capability)
    }

    /// Typed accessor for a composite capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn composite(&self, capability: &str) -> Result<Accessor<Composite>> {
        self.accessor(capability)
    }

    /// Typed accessor for a list capability.
    ///
    /// # Errors
    ///
    /// See [`accessor`](Self::accessor).
    pub fn list(&self, capability: &str) -> Result<Accessor<List>> {
        self.accessor(capability)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::EngineStopped,
        })
    }
}
