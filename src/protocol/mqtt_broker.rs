// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker connection backed by `rumqttc`.
//!
//! The connection keeps a background task polling the `rumqttc` event loop.
//! Incoming publishes and connection changes are forwarded to the engine
//! through a [`BrokerSink`]; after every reconnect the tracked subscriptions
//! are renewed, so the engine never has to resubscribe.
//!
//! # Examples
//!
//! ```no_run
//! use z2m_lib::protocol::MqttBroker;
//! use z2m_lib::sync::{SyncConfig, SyncEngine};
//!
//! # async fn example() -> z2m_lib::Result<()> {
//! let engine = SyncEngine::new(SyncConfig::default());
//! let broker = MqttBroker::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build(engine.broker_sink())
//!     .await?;
//!
//! let handle = engine.start(broker.clone());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use tokio::sync::oneshot;

use super::{Broker, BrokerSink, QoS};
use crate::error::ProtocolError;

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 64;

/// Configuration for an MQTT broker connection.
#[derive(Debug, Clone)]
struct MqttBrokerConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connection_timeout: Duration,
    reconnect_delay: Duration,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// A persistent MQTT connection usable as the engine's [`Broker`].
///
/// `MqttBroker` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct MqttBroker {
    inner: Arc<MqttBrokerInner>,
}

struct MqttBrokerInner {
    client: AsyncClient,
    /// Topic filters to renew after a reconnect.
    subscriptions: Mutex<BTreeSet<String>>,
    config: MqttBrokerConfig,
    connected: AtomicBool,
    closing: AtomicBool,
}

impl MqttBroker {
    /// Creates a new builder for configuring an MQTT broker connection.
    #[must_use]
    pub fn builder() -> MqttBrokerBuilder {
        MqttBrokerBuilder::default()
    }

    /// Returns whether the broker is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns whether authentication is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.inner.config.credentials.is_some()
    }

    /// Returns the tracked topic filters.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().iter().cloned().collect()
    }

    /// Disconnects from the broker and stops the background task.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.closing.store(true, Ordering::Release);
        self.inner.subscriptions.lock().clear();
        self.inner.client.disconnect().await?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Renews every tracked subscription without waiting on the event loop.
    fn resubscribe_all(&self) {
        let topics = self.subscriptions();
        for topic in topics {
            if let Err(e) = self
                .inner
                .client
                .try_subscribe(&topic, rumqttc::QoS::AtLeastOnce)
            {
                tracing::warn!(topic = %topic, error = %e, "Failed to renew subscription");
            }
        }
    }
}

impl Broker for MqttBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner.subscriptions.lock().insert(topic.to_string());
        self.inner
            .client
            .subscribe(topic, rumqttc::QoS::AtLeastOnce)
            .await?;
        tracing::debug!(topic = %topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner.subscriptions.lock().remove(topic);
        self.inner.client.unsubscribe(topic).await?;
        tracing::debug!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        self.inner
            .client
            .publish(topic, qos.into(), retain, payload)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an MQTT broker connection.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use z2m_lib::protocol::MqttBroker;
/// use z2m_lib::sync::{SyncConfig, SyncEngine};
///
/// # async fn example() -> z2m_lib::Result<()> {
/// let engine = SyncEngine::new(SyncConfig::default());
/// let broker = MqttBroker::builder()
///     .url("mqtt://192.168.1.50:1883")?
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .build(engine.broker_sink())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttBrokerBuilder {
    config: MqttBrokerConfig,
}

impl MqttBrokerBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets host and port from a `mqtt://host:port` URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidAddress`] if the port is not a number.
    pub fn url(mut self, url: &str) -> Result<Self, ProtocolError> {
        let (host, port) = parse_mqtt_url(url)?;
        self.config.host = host;
        self.config.port = port;
        Ok(self)
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the MQTT client identifier (default: generated).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the pause between reconnection attempts (default: 5 seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Connects to the broker, forwarding events to `sink`.
    ///
    /// Waits for the first connection acknowledgement. Later disconnects are
    /// retried in the background and reported through the sink.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self, sink: BrokerSink) -> Result<MqttBroker, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("z2m_lib_{}", uuid::Uuid::new_v4().simple()));

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let broker = MqttBroker {
            inner: Arc::new(MqttBrokerInner {
                client,
                subscriptions: Mutex::new(BTreeSet::new()),
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        };

        let broker_clone = broker.clone();
        let (connack_tx, connack_rx) = oneshot::channel();

        tokio::spawn(async move {
            handle_broker_events(event_loop, broker_clone, sink, Some(connack_tx)).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                Ok(broker)
            }
            Ok(Err(_)) => {
                broker.inner.closing.store(true, Ordering::Release);
                Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ))
            }
            Err(_) => {
                broker.inner.closing.store(true, Ordering::Release);
                Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    if url.contains("://") {
        return Err(ProtocolError::InvalidAddress(format!("Unsupported scheme: {url}")));
    }

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    Ok((host, port))
}

/// Polls the event loop until the broker is closed or the engine stops.
async fn handle_broker_events(
    mut event_loop: EventLoop,
    broker: MqttBroker,
    sink: BrokerSink,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = connack_tx;

    loop {
        if broker.inner.closing.load(Ordering::Acquire) {
            break;
        }

        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                broker.inner.connected.store(true, Ordering::Release);
                broker.resubscribe_all();
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
                if sink.connected().await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "MQTT message received"
                );
                if sink
                    .message(publish.topic.clone(), publish.payload.to_vec())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                if broker.inner.connected.swap(false, Ordering::AcqRel)
                    && sink.disconnected().await.is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if broker.inner.closing.load(Ordering::Acquire) {
                    break;
                }
                tracing::error!(error = %e, "MQTT broker event loop error");
                if broker.inner.connected.swap(false, Ordering::AcqRel)
                    && sink.disconnected().await.is_err()
                {
                    break;
                }
                tokio::time::sleep(broker.inner.config.reconnect_delay).await;
            }
        }
    }

    broker.inner.connected.store(false, Ordering::Release);
    tracing::debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn builder_default_values() {
        let builder = MqttBrokerBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert!(builder.config.client_id.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn builder_chain() {
        let builder = MqttBrokerBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .client_id("automations")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .reconnect_delay(Duration::from_millis(250));

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert!(builder.config.credentials.is_some());
        assert_eq!(builder.config.client_id.as_deref(), Some("automations"));
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn builder_from_url() {
        let builder = MqttBrokerBuilder::default()
            .url("mqtt://broker.local:1884")
            .unwrap();
        assert_eq!(builder.config.host, "broker.local");
        assert_eq!(builder.config.port, 1884);
    }

    #[test]
    fn parse_mqtt_url_variants() {
        assert_eq!(
            parse_mqtt_url("mqtt://192.168.1.50:1883").unwrap(),
            ("192.168.1.50".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("tcp://broker").unwrap(),
            ("broker".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("localhost:2000").unwrap(),
            ("localhost".to_string(), 2000)
        );
        assert!(matches!(
            parse_mqtt_url("mqtt://broker:port"),
            Err(ProtocolError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_mqtt_url("ws://broker:9001"),
            Err(ProtocolError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let result = MqttBrokerBuilder::default()
            .build(BrokerSink::new(tx))
            .await;
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
    }
}
