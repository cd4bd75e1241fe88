// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Z2M` Lib - Typed device proxies for zigbee2mqtt automations.
//!
//! This library keeps a local, validated mirror of every device a
//! zigbee2mqtt bridge announces and gives automation code typed handles to
//! read and write them over MQTT.
//!
//! # Supported Features
//!
//! - **Descriptor parsing**: `bridge/devices` exposes become typed capabilities
//! - **Typed proxies**: validated getters and setters per capability
//! - **State synchronization**: debounced writes, confirmation, bounded retry
//! - **Change callbacks**: per device and capability, with error isolation
//! - **Events**: device lifecycle, availability and sync state broadcasts
//! - **Testing**: an in-process [`MockBroker`] playing the bridge
//!
//! # Quick Start
//!
//! ## Connecting to a Broker
//!
//! ```no_run
//! use std::time::Duration;
//! use z2m_lib::{MqttBroker, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> z2m_lib::Result<()> {
//!     let engine = SyncEngine::new(SyncConfig::default());
//!     let broker = MqttBroker::builder()
//!         .host("192.168.1.50")
//!         .credentials("automation", "secret")
//!         .build(engine.broker_sink())
//!         .await?;
//!     let handle = engine.start(broker);
//!
//!     let lamp = handle
//!         .wait_for_device("living_room/lamp", Duration::from_secs(10))
//!         .await?;
//!     lamp.set("state", true)?;
//!     lamp.numeric("brightness")?.set(180.0)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Reacting to Changes
//!
//! ```no_run
//! # async fn demo(handle: z2m_lib::SyncHandle) -> z2m_lib::Result<()> {
//! let lamp = handle.proxy("hall_lamp")?;
//! handle.on_change("hall_sensor", "occupancy", move |change| {
//!     lamp.set("state", change.as_bool() == Some(true))?;
//!     Ok(())
//! });
//!
//! handle.on_write_failure("hall_lamp", None, |failure| {
//!     tracing::warn!(%failure, "Lamp did not follow");
//!     Ok(())
//! });
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing Automations
//!
//! ```
//! use serde_json::json;
//! use z2m_lib::{MockBroker, SyncConfig, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> z2m_lib::Result<()> {
//! let engine = SyncEngine::new(SyncConfig::default());
//! let broker = MockBroker::new(engine.broker_sink());
//! let handle = engine.start(broker.clone());
//!
//! broker.connect().await?;
//! broker
//!     .inject_json("zigbee2mqtt/bridge/devices", &json!([{
//!         "ieee_address": "0x01",
//!         "friendly_name": "plug",
//!         "definition": {"exposes": [{"type": "switch", "features": [{
//!             "type": "binary", "property": "state", "access": 7,
//!             "value_on": "ON", "value_off": "OFF"
//!         }]}]}
//!     }]))
//!     .await?;
//! handle.flush().await?;
//!
//! let plug = handle.proxy("plug")?;
//! assert_eq!(plug.get("state")?, None);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`capability`]: descriptor parsing, kinds, values and the wire codec
//! - [`proxy`]: proxy generation and typed accessors
//! - [`state`]: the state cache and snapshots
//! - [`sync`]: the engine task, its handle and configuration
//! - [`dispatch`]: callback registration and isolated delivery
//! - [`event`]: broadcast events
//! - [`protocol`]: the broker seam, MQTT and mock implementations

pub mod capability;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod protocol;
pub mod proxy;
pub mod state;
pub mod sync;

pub use capability::{Access, Capability, CapabilityKind, DeviceDescriptor, Value};
pub use dispatch::{DeviceSelector, DispatchError, SubscriptionId};
pub use error::{
    DecodeError, Error, ParseError, ProtocolError, Result, StaleProxyError, ValidationError,
};
pub use event::{DeviceId, SyncEvent};
pub use protocol::{Broker, BrokerSink, MockBroker, QoS};
#[cfg(feature = "mqtt")]
pub use protocol::{MqttBroker, MqttBrokerBuilder};
pub use proxy::{Accessor, DeviceProxy};
pub use state::{ConflictPolicy, StateChange, StateSnapshot};
pub use sync::{RetryPolicy, SyncConfig, SyncEngine, SyncHandle, SyncState, WriteFailure};
