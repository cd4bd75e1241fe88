// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::sync::{broadcast, mpsc};

use super::devices::DeviceTable;
use super::{Command, Route, SyncConfig, SyncHandle, SyncState, TopicScheme, WriteFailure};
use crate::capability::{Capability, DeviceDescriptor, Value, parse_device_list};
use crate::dispatch::{CallbackRegistry, Dispatcher, Notification};
use crate::error::{DecodeError, ParseError};
use crate::event::{DeviceId, EventBus, SyncEvent};
use crate::protocol::{Broker, BrokerEvent, BrokerSink};
use crate::proxy::{ProxyBinding, generate};
use crate::state::{ApplyOutcome, StateCache, StateChange, WriteIntent};

/// Builder and owner of the synchronization task.
///
/// Create the engine, hand [`broker_sink`](Self::broker_sink) to a broker,
/// then [`start`](Self::start) it with that broker. Callbacks and event
/// receivers may be attached before starting so nothing is missed.
///
/// # Examples
///
/// ```
/// use z2m_lib::protocol::MockBroker;
/// use z2m_lib::sync::{SyncConfig, SyncEngine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> z2m_lib::Result<()> {
/// let engine = SyncEngine::new(SyncConfig::default().with_base_topic("z2m"));
/// let mut events = engine.events();
/// let broker = MockBroker::new(engine.broker_sink());
/// let handle = engine.start(broker.clone());
///
/// broker.connect().await?;
/// handle.flush().await?;
/// assert!(events.try_recv().is_ok());
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
    registry: Arc<CallbackRegistry>,
    events: EventBus,
}

impl SyncEngine {
    /// Creates an engine that is not running yet.
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let events = EventBus::with_capacity(config.event_capacity.max(1));
        Self {
            config,
            tx,
            rx,
            registry: Arc::new(CallbackRegistry::new()),
            events,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the sink a broker pushes its events into.
    #[must_use]
    pub fn broker_sink(&self) -> BrokerSink {
        BrokerSink::new(self.tx.clone())
    }

    /// The callback registry; callbacks registered here survive `start`.
    #[must_use]
    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Returns a receiver for every event produced after this call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Spawns the engine task and returns a handle to it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start<B: Broker>(self, broker: B) -> SyncHandle {
        let devices = Arc::new(DeviceTable::new());
        let handle = SyncHandle::new(
            self.tx.clone(),
            Arc::clone(&devices),
            Arc::clone(&self.registry),
            self.events.clone(),
        );

        let engine = Engine {
            topics: TopicScheme::new(self.config.base_topic.clone()),
            cache: StateCache::new(self.config.conflict_policy),
            dispatcher: Dispatcher::new(self.registry),
            config: self.config,
            broker,
            devices,
            events: self.events,
            timers: self.tx.downgrade(),
            next_epoch: 0,
            connected: false,
            bridge_online: None,
        };
        tokio::spawn(engine.run(self.rx));
        handle
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Engine<B> {
    config: SyncConfig,
    topics: TopicScheme,
    broker: B,
    cache: StateCache,
    dispatcher: Dispatcher,
    devices: Arc<DeviceTable>,
    events: EventBus,
    /// Timers must not keep the queue open on their own.
    timers: mpsc::WeakSender<Command>,
    next_epoch: u64,
    connected: bool,
    bridge_online: Option<bool>,
}

impl<B: Broker> Engine<B> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::info!(base_topic = %self.topics.base(), "Sync engine started");
        self.subscribe(&self.topics.bridge_devices()).await;
        self.subscribe(&self.topics.bridge_state()).await;

        while let Some(command) = rx.recv().await {
            if let Command::Shutdown(ack) = command {
                self.shutdown().await;
                rx.close();
                let _ = ack.send(());
                break;
            }
            self.handle(command).await;
            self.dispatcher.drain();
        }
        tracing::info!("Sync engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Broker(event) => self.on_broker_event(event).await,
            Command::Write {
                device,
                epoch,
                capability,
                value,
            } => self.on_write(&device, epoch, &capability, value),
            Command::Toggle {
                device,
                epoch,
                capability,
            } => self.on_toggle(&device, epoch, &capability).await,
            Command::Query {
                device,
                epoch,
                capability,
            } => {
                if let Some(binding) = self.live_binding(&device, epoch) {
                    self.query(&binding, capability.as_deref()).await;
                }
            }
            Command::Flush {
                device,
                capability,
                token,
            } => self.publish_attempt(&device, &capability, token).await,
            Command::Retry {
                device,
                capability,
                token,
            } => self.on_retry(&device, &capability, token).await,
            Command::Barrier(ack) => {
                let _ = ack.send(());
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    async fn shutdown(&mut self) {
        for binding in self.devices.all() {
            self.unsubscribe(&binding.topics().state).await;
            self.unsubscribe(&binding.topics().availability).await;
        }
        self.unsubscribe(&self.topics.bridge_devices()).await;
        self.unsubscribe(&self.topics.bridge_state()).await;
        self.dispatcher.drain();
    }

    async fn on_broker_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => {
                tracing::info!("Broker connected");
                self.connected = true;
                self.events.publish(SyncEvent::Connected);
                for binding in self.devices.all() {
                    // Failed writes stay visible until fresh values arrive
                    if binding.sync_state() != SyncState::Stale {
                        self.set_sync_state(&binding, SyncState::Unsynced);
                    }
                    if self.config.query_on_connect {
                        self.query(&binding, None).await;
                    }
                }
            }
            BrokerEvent::Disconnected => {
                tracing::warn!("Broker disconnected");
                self.connected = false;
                self.events.publish(SyncEvent::Disconnected);
            }
            BrokerEvent::Message { topic, payload } => match self.topics.route(&topic) {
                Route::BridgeDevices => self.on_device_list(&payload).await,
                Route::BridgeState => self.on_bridge_state(&payload),
                Route::Availability(name) => self.on_availability(name, &payload),
                Route::State(name) => self.on_state(name, &payload),
                Route::Bridge(_) | Route::Command(_) | Route::Foreign => {
                    tracing::trace!(topic = %topic, "Ignoring message");
                }
            },
        }
    }

    async fn on_device_list(&mut self, payload: &[u8]) {
        let entries = match parse_device_list(payload) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed device list");
                return;
            }
        };

        let mut seen = HashSet::new();
        for entry in entries {
            match entry {
                Ok(descriptor) => {
                    seen.insert(descriptor.id().clone());
                    self.upsert(descriptor).await;
                }
                Err(err) => {
                    let device = match &err {
                        ParseError::InvalidDevice { device, .. } if device != "<unknown>" => {
                            Some(DeviceId::new(device.clone()))
                        }
                        _ => None,
                    };
                    tracing::warn!(error = %err, "Rejected device descriptor");
                    self.events.publish(SyncEvent::DescriptorRejected {
                        device,
                        error: err.to_string(),
                    });
                }
            }
        }

        for id in self.devices.ids() {
            if !seen.contains(&id) {
                self.remove_device(&id).await;
            }
        }
    }

    async fn upsert(&mut self, descriptor: DeviceDescriptor) {
        let Some(current) = self.devices.binding(descriptor.id()) else {
            let binding = self.install(descriptor).await;
            tracing::info!(
                device = %binding.descriptor().id(),
                friendly_name = %binding.descriptor().friendly_name(),
                "Device added"
            );
            self.events.publish(SyncEvent::DeviceAdded {
                device: binding.descriptor().id().clone(),
                friendly_name: binding.descriptor().friendly_name().to_string(),
            });
            return;
        };

        if current.descriptor().same_generation(&descriptor) {
            return;
        }

        self.retire(&current).await;
        let binding = self.install(descriptor).await;
        tracing::info!(
            device = %binding.descriptor().id(),
            friendly_name = %binding.descriptor().friendly_name(),
            epoch = binding.epoch(),
            "Device descriptor replaced"
        );
        self.events.publish(SyncEvent::DeviceReplaced {
            device: binding.descriptor().id().clone(),
            friendly_name: binding.descriptor().friendly_name().to_string(),
        });
    }

    async fn install(&mut self, descriptor: DeviceDescriptor) -> Arc<ProxyBinding> {
        let descriptor = Arc::new(descriptor);
        self.next_epoch += 1;
        let binding = generate(Arc::clone(&descriptor), self.next_epoch, &self.topics);
        binding.publish_snapshot(self.cache.register(descriptor));
        self.devices.insert(Arc::clone(&binding));

        self.subscribe(&binding.topics().state).await;
        self.subscribe(&binding.topics().availability).await;
        if self.connected && self.config.query_on_connect {
            self.query(&binding, None).await;
        }
        binding
    }

    async fn retire(&mut self, binding: &Arc<ProxyBinding>) {
        self.set_sync_state(binding, SyncState::Stale);
        binding.retire();
        // A renamed device may now own these topics
        if !self.topic_in_use(&binding.topics().state, binding) {
            self.unsubscribe(&binding.topics().state).await;
            self.unsubscribe(&binding.topics().availability).await;
        }
    }

    fn topic_in_use(&self, topic: &str, except: &Arc<ProxyBinding>) -> bool {
        self.devices
            .all()
            .iter()
            .any(|other| !Arc::ptr_eq(other, except) && other.topics().state == topic)
    }

    async fn remove_device(&mut self, device: &DeviceId) {
        let Some(binding) = self.devices.remove(device) else {
            return;
        };
        self.retire(&binding).await;
        self.cache.remove(device);
        tracing::info!(device = %device, "Device removed");
        self.events.publish(SyncEvent::DeviceRemoved {
            device: device.clone(),
        });
    }

    fn on_bridge_state(&mut self, payload: &[u8]) {
        let Some(online) = parse_online(payload) else {
            tracing::warn!("Dropping malformed bridge state");
            return;
        };
        if self.bridge_online != Some(online) {
            self.bridge_online = Some(online);
            tracing::info!(online, "Bridge state changed");
            self.events.publish(SyncEvent::BridgeStateChanged { online });
        }
    }

    fn on_availability(&mut self, friendly_name: &str, payload: &[u8]) {
        let Some(binding) = self.devices.by_name(friendly_name) else {
            return;
        };
        let Some(available) = parse_online(payload) else {
            tracing::warn!(friendly_name = %friendly_name, "Dropping malformed availability");
            return;
        };
        if binding.set_availability(available) {
            tracing::debug!(friendly_name = %friendly_name, available, "Availability changed");
            self.events.publish(SyncEvent::AvailabilityChanged {
                device: binding.descriptor().id().clone(),
                available,
            });
        }
    }

    fn on_state(&mut self, friendly_name: &str, payload: &[u8]) {
        let Some(binding) = self.devices.by_name(friendly_name) else {
            tracing::trace!(friendly_name = %friendly_name, "State for unknown device");
            return;
        };
        // Retained state is cleared with an empty payload
        if payload.is_empty() {
            return;
        }
        let object = match decode_object(payload) {
            Ok(object) => object,
            Err(err) => {
                tracing::warn!(
                    friendly_name = %friendly_name,
                    error = %err,
                    "Dropping state payload"
                );
                return;
            }
        };

        let descriptor = Arc::clone(binding.descriptor());
        let device = descriptor.id();
        let mut touched = false;
        for (key, raw) in &object {
            let Some(capability) = descriptor.capability(key) else {
                tracing::debug!(
                    device = %device,
                    error = %DecodeError::UnknownCapability(key.clone()),
                    "Skipping state entry"
                );
                continue;
            };
            let Some(value) = capability.decode(raw) else {
                continue;
            };

            let previous = self
                .cache
                .snapshot(device)
                .and_then(|snapshot| snapshot.get(key).cloned());
            match self.cache.apply(device, key, value.clone()) {
                ApplyOutcome::Applied {
                    snapshot,
                    changed,
                    confirmed,
                } => {
                    touched = true;
                    binding.publish_snapshot(Arc::clone(&snapshot));
                    if changed || confirmed {
                        let change = StateChange {
                            device: device.clone(),
                            friendly_name: descriptor.friendly_name().to_string(),
                            capability: key.clone(),
                            value,
                            previous,
                            changed,
                            confirmed,
                            snapshot,
                        };
                        self.events.publish(SyncEvent::StateChanged(change.clone()));
                        self.dispatcher.enqueue(Notification::Change(change));
                    }
                }
                ApplyOutcome::Rejected(reason) => {
                    tracing::warn!(
                        device = %device,
                        capability = %key,
                        reason = ?reason,
                        "Rejected state value"
                    );
                }
                ApplyOutcome::SupersededByPending => {
                    tracing::debug!(
                        device = %device,
                        capability = %key,
                        "State value superseded by pending write"
                    );
                }
            }
        }

        if touched {
            self.advance_sync(&binding);
        }
    }

    fn advance_sync(&self, binding: &Arc<ProxyBinding>) {
        if binding.is_retired() {
            return;
        }
        if binding.sync_state() == SyncState::Stale
            && binding.snapshot().stale_capabilities().next().is_some()
        {
            return;
        }
        let next = if binding.tracked_known() {
            SyncState::Synced
        } else {
            SyncState::Syncing
        };
        self.set_sync_state(binding, next);
    }

    fn set_sync_state(&self, binding: &ProxyBinding, state: SyncState) {
        if binding.set_sync_state(state) {
            tracing::debug!(
                device = %binding.descriptor().id(),
                state = %state,
                "Sync state changed"
            );
            self.events.publish(SyncEvent::SyncStateChanged {
                device: binding.descriptor().id().clone(),
                state,
            });
        }
    }

    fn live_binding(&self, device: &DeviceId, epoch: u64) -> Option<Arc<ProxyBinding>> {
        let binding = self
            .devices
            .binding(device)
            .filter(|binding| binding.epoch() == epoch && !binding.is_retired());
        if binding.is_none() {
            tracing::debug!(device = %device, epoch, "Dropping command from stale proxy");
        }
        binding
    }

    fn on_write(&mut self, device: &DeviceId, epoch: u64, capability: &str, value: Value) {
        let Some(binding) = self.live_binding(device, epoch) else {
            return;
        };
        match self.cache.begin_write(device, capability, value) {
            Ok(WriteIntent::Scheduled { token }) => {
                self.schedule(
                    self.config.debounce,
                    Command::Flush {
                        device: device.clone(),
                        capability: capability.to_string(),
                        token,
                    },
                );
            }
            Ok(WriteIntent::Coalesced { token }) => {
                tracing::debug!(device = %device, capability = %capability, token, "Write coalesced");
            }
            Err(reason) => {
                tracing::warn!(
                    device = %device,
                    capability = %capability,
                    reason = ?reason,
                    "Write refused"
                );
                return;
            }
        }
        if binding.sync_state() == SyncState::Unsynced {
            self.set_sync_state(&binding, SyncState::Syncing);
        }
    }

    async fn on_toggle(&mut self, device: &DeviceId, epoch: u64, capability: &str) {
        let Some(binding) = self.live_binding(device, epoch) else {
            return;
        };
        let Some(toggle) = binding
            .descriptor()
            .capability(capability)
            .and_then(Capability::value_toggle)
            .cloned()
        else {
            return;
        };
        // The toggle replaces whatever value was about to be written
        if self.cache.take_pending(device, capability).is_some() {
            tracing::debug!(
                device = %device,
                capability = %capability,
                "Pending write dropped by toggle"
            );
        }

        let mut body = Map::new();
        body.insert(capability.to_string(), toggle);
        let payload = Json::Object(body).to_string();
        let topic = &binding.topics().set;
        match self
            .broker
            .publish(topic, payload.clone().into_bytes(), self.config.qos, false)
            .await
        {
            Ok(()) => tracing::debug!(topic = %topic, payload = %payload, "Published toggle"),
            Err(err) => tracing::warn!(topic = %topic, error = %err, "Toggle publish failed"),
        }
        if binding.sync_state() == SyncState::Unsynced {
            self.set_sync_state(&binding, SyncState::Syncing);
        }
    }

    async fn on_retry(&mut self, device: &DeviceId, capability: &str, token: u64) {
        let Some(pending) = self.cache.pending(device, capability) else {
            return;
        };
        if pending.token() != token {
            return;
        }
        if self.config.retry.should_retry(pending.attempts()) {
            tracing::debug!(
                device = %device,
                capability = %capability,
                attempts = pending.attempts(),
                "Write unconfirmed, retrying"
            );
            self.publish_attempt(device, capability, token).await;
        } else {
            self.fail_write(device, capability);
        }
    }

    async fn publish_attempt(&mut self, device: &DeviceId, capability: &str, token: u64) {
        let Some(binding) = self.devices.binding(device) else {
            return;
        };
        let Some(definition) = binding.descriptor().capability(capability) else {
            return;
        };
        // Confirmed or superseded since the timer was armed
        let Some(pending) = self.cache.record_attempt(device, capability, token) else {
            return;
        };
        let attempts = pending.attempts();

        let mut body = Map::new();
        body.insert(capability.to_string(), definition.encode(pending.value()));
        let payload = Json::Object(body).to_string();

        let topic = &binding.topics().set;
        match self
            .broker
            .publish(topic, payload.clone().into_bytes(), self.config.qos, false)
            .await
        {
            Ok(()) => {
                tracing::debug!(topic = %topic, payload = %payload, attempts, "Published write");
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, attempts, "Write publish failed");
            }
        }

        // Write-only properties are never reported back
        if !definition.is_readable() {
            self.cache.take_pending(device, capability);
            return;
        }

        self.schedule(
            self.config.retry.delay_for_attempt(attempts),
            Command::Retry {
                device: device.clone(),
                capability: capability.to_string(),
                token,
            },
        );
    }

    fn fail_write(&mut self, device: &DeviceId, capability: &str) {
        let Some(pending) = self.cache.take_pending(device, capability) else {
            return;
        };
        let Some(binding) = self.devices.binding(device) else {
            return;
        };
        if let Some(snapshot) = self.cache.mark_capability_stale(device, capability) {
            binding.publish_snapshot(snapshot);
        }
        self.set_sync_state(&binding, SyncState::Stale);

        let failure = WriteFailure {
            device: device.clone(),
            friendly_name: binding.descriptor().friendly_name().to_string(),
            capability: capability.to_string(),
            value: pending.value().clone(),
            attempts: pending.attempts(),
        };
        tracing::warn!(
            device = %device,
            capability = %capability,
            attempts = failure.attempts,
            "Write was never confirmed"
        );
        self.events.publish(SyncEvent::WriteFailed(failure.clone()));
        self.dispatcher.enqueue(Notification::WriteFailure(failure));
    }

    async fn query(&self, binding: &ProxyBinding, capability: Option<&str>) {
        let body: Map<String, Json> = match capability {
            Some(name) => std::iter::once(name).map(empty_request).collect(),
            None => binding
                .descriptor()
                .capabilities()
                .iter()
                .filter(|c| c.is_queryable())
                .map(Capability::name)
                .map(empty_request)
                .collect(),
        };
        if body.is_empty() {
            return;
        }

        let topic = &binding.topics().get;
        let payload = Json::Object(body).to_string().into_bytes();
        if let Err(err) = self
            .broker
            .publish(topic, payload, self.config.qos, false)
            .await
        {
            tracing::warn!(topic = %topic, error = %err, "Query publish failed");
        }
    }

    fn schedule(&self, delay: Duration, command: Command) {
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = timers.upgrade() {
                let _ = tx.send(command).await;
            }
        });
    }

    async fn subscribe(&self, topic: &str) {
        if let Err(err) = self.broker.subscribe(topic).await {
            tracing::warn!(topic = %topic, error = %err, "Subscribe failed");
        }
    }

    async fn unsubscribe(&self, topic: &str) {
        if let Err(err) = self.broker.unsubscribe(topic).await {
            tracing::debug!(topic = %topic, error = %err, "Unsubscribe failed");
        }
    }
}

fn empty_request(name: &str) -> (String, Json) {
    (name.to_string(), Json::String(String::new()))
}

fn decode_object(payload: &[u8]) -> Result<Map<String, Json>, DecodeError> {
    match serde_json::from_slice(payload)? {
        Json::Object(object) => Ok(object),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Accepts `{"state":"online"}`, `"online"` and bare `online`.
fn parse_online(payload: &[u8]) -> Option<bool> {
    let text = match serde_json::from_slice::<Json>(payload) {
        Ok(Json::Object(object)) => object.get("state")?.as_str()?.to_string(),
        Ok(Json::String(text)) => text,
        Ok(_) => return None,
        Err(_) => std::str::from_utf8(payload).ok()?.trim().to_string(),
    };
    match text.as_str() {
        "online" => Some(true),
        "offline" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_payload_forms() {
        assert_eq!(parse_online(br#"{"state":"online"}"#), Some(true));
        assert_eq!(parse_online(br#"{"state":"offline"}"#), Some(false));
        assert_eq!(parse_online(br#""online""#), Some(true));
        assert_eq!(parse_online(b"offline"), Some(false));
        assert_eq!(parse_online(b"maybe"), None);
        assert_eq!(parse_online(b"[1]"), None);
    }

    #[test]
    fn state_payload_must_be_an_object() {
        assert!(decode_object(br#"{"state":"ON"}"#).is_ok());
        assert!(matches!(decode_object(b"[]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_object(b"{"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn query_entries_are_empty_strings() {
        assert_eq!(empty_request("state"), ("state".to_string(), Json::String(String::new())));
    }
}
