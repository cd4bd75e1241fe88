// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker capability used by the synchronization engine.
//!
//! The engine never talks to a network library directly. It needs three
//! operations, captured by the [`Broker`] trait, and it receives connection
//! changes and messages through a [`BrokerSink`] that feeds its command
//! queue.
//!
//! # Implementations
//!
//! - [`MqttBroker`]: a real MQTT connection built on `rumqttc` (feature `mqtt`)
//! - [`MockBroker`]: an in-process broker that records publishes and lets
//!   tests inject messages

mod mock;
#[cfg(feature = "mqtt")]
mod mqtt_broker;

pub use mock::{MockBroker, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt_broker::{MqttBroker, MqttBrokerBuilder};

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::sync::Command;

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Delivered at least once.
    #[default]
    AtLeastOnce,
    /// Delivered exactly once.
    ExactlyOnce,
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// What a broker reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The connection was established or re-established.
    Connected,
    /// The connection was lost.
    Disconnected,
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message was published to.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
}

/// Outgoing half of a broker connection.
///
/// Implementations must tolerate calls while disconnected, either by
/// queueing or by returning an error; the engine treats a failed publish as
/// a failed write attempt and retries it.
pub trait Broker: Send + Sync + 'static {
    /// Subscribes to a topic filter.
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Removes a subscription.
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Publishes a payload.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// Incoming half of a broker connection.
///
/// Obtained from [`SyncEngine::broker_sink`](crate::sync::SyncEngine::broker_sink)
/// and handed to the broker implementation, which pushes connection changes
/// and messages through it. Everything sent here is processed on the engine
/// task in order.
#[derive(Debug, Clone)]
pub struct BrokerSink {
    tx: mpsc::Sender<Command>,
}

impl BrokerSink {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Forwards an event, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn send(&self, event: BrokerEvent) -> Result<(), ProtocolError> {
        self.tx
            .send(Command::Broker(event))
            .await
            .map_err(|_| ProtocolError::ChannelClosed("engine command queue".to_string()))
    }

    /// Reports an established connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn connected(&self) -> Result<(), ProtocolError> {
        self.send(BrokerEvent::Connected).await
    }

    /// Reports a lost connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn disconnected(&self) -> Result<(), ProtocolError> {
        self.send(BrokerEvent::Disconnected).await
    }

    /// Forwards an incoming message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn message(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        self.send(BrokerEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
    }

    /// Returns `true` once the engine has stopped accepting events.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
