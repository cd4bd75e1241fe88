// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Automation-facing handle to a running engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::devices::DeviceTable;
use super::{Command, SyncState, WriteFailure};
use crate::capability::DeviceDescriptor;
use crate::dispatch::{
    CallbackRegistry, CallbackResult, DeviceSelector, DispatchError, SubscriptionId,
};
use crate::error::{Error, Result};
use crate::event::{EventBus, SyncEvent};
use crate::proxy::{DeviceProxy, ProxyBinding};
use crate::state::{StateChange, StateSnapshot};

/// Cloneable handle to a running [`SyncEngine`](super::SyncEngine).
///
/// Devices are looked up by IEEE address or friendly name.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    devices: Arc<DeviceTable>,
    registry: Arc<CallbackRegistry>,
    events: EventBus,
}

impl SyncHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        devices: Arc<DeviceTable>,
        registry: Arc<CallbackRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            commands,
            devices,
            registry,
            events,
        }
    }

    fn binding(&self, device: &str) -> Result<Arc<ProxyBinding>> {
        self.devices
            .resolve(device)
            .ok_or_else(|| Error::DeviceNotFound(device.to_string()))
    }

    /// Returns a proxy for the current descriptor of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the bridge has not announced it.
    pub fn proxy(&self, device: &str) -> Result<DeviceProxy> {
        let binding = self.binding(device)?;
        Ok(DeviceProxy::new(&binding, self.commands.clone()))
    }

    /// Descriptors of every known device, sorted by friendly name.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<DeviceDescriptor>> {
        self.devices
            .all()
            .iter()
            .map(|binding| Arc::clone(binding.descriptor()))
            .collect()
    }

    /// The latest snapshot of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown device.
    pub fn current_snapshot(&self, device: &str) -> Result<Arc<StateSnapshot>> {
        Ok(self.binding(device)?.snapshot())
    }

    /// The synchronization state of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown device.
    pub fn sync_state(&self, device: &str) -> Result<SyncState> {
        Ok(self.binding(device)?.sync_state())
    }

    /// Availability of a device, `None` until the bridge reports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown device.
    pub fn availability(&self, device: &str) -> Result<Option<bool>> {
        Ok(self.binding(device)?.availability())
    }

    /// Registers a callback for every capability change of a device.
    pub fn subscribe<F>(&self, device: impl Into<DeviceSelector>, callback: F) -> SubscriptionId
    where
        F: Fn(&StateChange) -> CallbackResult + Send + Sync + 'static,
    {
        self.registry.on_change(device, None, callback)
    }

    /// Registers a callback for changes of one capability.
    ///
    /// The device does not need to be known yet.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn demo(handle: &z2m_lib::SyncHandle) {
    /// handle.on_change("hall_sensor", "occupancy", |change| {
    ///     if change.as_bool() == Some(true) {
    ///         tracing::info!("Someone is in the hall");
    ///     }
    ///     Ok(())
    /// });
    /// # }
    /// ```
    pub fn on_change<F>(
        &self,
        device: impl Into<DeviceSelector>,
        capability: &str,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&StateChange) -> CallbackResult + Send + Sync + 'static,
    {
        self.registry.on_change(device, Some(capability), callback)
    }

    /// Registers a callback for writes that were never confirmed.
    ///
    /// With `capability == None` every capability of the device matches.
    pub fn on_write_failure<F>(
        &self,
        device: impl Into<DeviceSelector>,
        capability: Option<&str>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&WriteFailure) -> CallbackResult + Send + Sync + 'static,
    {
        self.registry.on_write_failure(device, capability, callback)
    }

    /// Registers a sink for failing or panicking callbacks.
    pub fn on_callback_error<F>(&self, sink: F) -> SubscriptionId
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.registry.on_callback_error(sink)
    }

    /// Removes a registration; returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Returns a receiver for every event produced after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Waits until every command queued before this call has been processed
    /// and its callbacks have run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine is not running.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Barrier(ack))
            .await
            .map_err(|_| Error::EngineStopped)?;
        done.await.map_err(|_| Error::EngineStopped)
    }

    /// Waits until the bridge announces a device, then returns its proxy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the device does not appear in time, or
    /// [`Error::EngineStopped`] if the engine stops first.
    pub async fn wait_for_device(&self, device: &str, timeout: Duration) -> Result<DeviceProxy> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.devices.changed().notified();
            if let Ok(proxy) = self.proxy(device) {
                return Ok(proxy);
            }
            if self.commands.is_closed() {
                return Err(Error::EngineStopped);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(Error::Timeout(millis));
            }
        }
    }

    /// Stops the engine after it unsubscribes from the bridge.
    ///
    /// Calling this on a stopped engine does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine task ended without
    /// acknowledging the request.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).await.is_err() {
            return Ok(());
        }
        done.await.map_err(|_| Error::EngineStopped)
    }

    /// Returns `true` until the engine has stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
