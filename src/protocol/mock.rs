// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process broker for automation tests.
//!
//! [`MockBroker`] records everything the engine publishes and lets a test
//! play the part of the bridge by injecting messages, connects and
//! disconnects.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use z2m_lib::protocol::MockBroker;
//! use z2m_lib::sync::{SyncConfig, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> z2m_lib::Result<()> {
//! let engine = SyncEngine::new(SyncConfig::default());
//! let broker = MockBroker::new(engine.broker_sink());
//! let handle = engine.start(broker.clone());
//!
//! broker.connect().await?;
//! handle.flush().await?;
//! assert!(broker.is_subscribed("zigbee2mqtt/bridge/devices"));
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Broker, BrokerSink, QoS};
use crate::error::ProtocolError;

/// A message published through a [`MockBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Requested delivery guarantee.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
}

impl PublishedMessage {
    /// Returns the payload as UTF-8 text.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Parses the payload as JSON.
    #[must_use]
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Broker that lives entirely in memory.
///
/// Clones share the same state, so a test keeps one clone and hands another
/// to [`SyncEngine::start`](crate::sync::SyncEngine::start).
#[derive(Debug, Clone)]
pub struct MockBroker {
    inner: Arc<MockBrokerInner>,
}

#[derive(Debug)]
struct MockBrokerInner {
    sink: BrokerSink,
    published: Mutex<Vec<PublishedMessage>>,
    unread: Mutex<VecDeque<PublishedMessage>>,
    subscriptions: Mutex<BTreeSet<String>>,
    fail_publishes: AtomicBool,
    published_notify: Notify,
}

impl MockBroker {
    /// Creates a broker feeding the given sink.
    #[must_use]
    pub fn new(sink: BrokerSink) -> Self {
        Self {
            inner: Arc::new(MockBrokerInner {
                sink,
                published: Mutex::new(Vec::new()),
                unread: Mutex::new(VecDeque::new()),
                subscriptions: Mutex::new(BTreeSet::new()),
                fail_publishes: AtomicBool::new(false),
                published_notify: Notify::new(),
            }),
        }
    }

    /// Reports a connection to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.inner.sink.connected().await
    }

    /// Reports a lost connection to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.inner.sink.disconnected().await
    }

    /// Delivers a message as if the bridge had published it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn inject(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        self.inner.sink.message(topic, payload).await
    }

    /// Delivers a JSON message as if the bridge had published it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] once the engine has stopped.
    pub async fn inject_json(
        &self,
        topic: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.inject(topic, payload.to_string()).await
    }

    /// Makes every following publish fail (or succeed again).
    pub fn set_fail_publishes(&self, fail: bool) {
        self.inner.fail_publishes.store(fail, Ordering::Release);
    }

    /// Everything published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.published.lock().clone()
    }

    /// Messages published to one topic, oldest first.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of successful publishes so far.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.inner.published.lock().len()
    }

    /// Forgets all recorded publishes.
    pub fn clear_published(&self) {
        self.inner.published.lock().clear();
        self.inner.unread.lock().clear();
    }

    /// Waits for the next publish not yet returned by this method.
    ///
    /// Returns `None` if nothing is published within `timeout`.
    pub async fn next_publish(&self, timeout: Duration) -> Option<PublishedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.published_notify.notified();
            if let Some(message) = self.inner.unread.lock().pop_front() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Current subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().iter().cloned().collect()
    }

    /// Returns `true` if the topic is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.subscriptions.lock().contains(topic)
    }
}

impl Broker for MockBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner.subscriptions.lock().insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner.subscriptions.lock().remove(topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        if self.inner.fail_publishes.load(Ordering::Acquire) {
            return Err(ProtocolError::PublishFailed(topic.to_string()));
        }
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        };
        tracing::debug!(topic = %message.topic, "mock publish");
        self.inner.published.lock().push(message.clone());
        self.inner.unread.lock().push_back(message);
        self.inner.published_notify.notify_waiters();
        Ok(())
    }
}
