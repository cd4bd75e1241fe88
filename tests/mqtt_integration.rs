// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT broker connection using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::time::Duration;

use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;
use z2m_lib::protocol::{Broker, MqttBroker, QoS};
use z2m_lib::{SyncConfig, SyncEngine, SyncEvent};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to bind
    sleep(Duration::from_millis(500)).await;
}

// ============================================================================
// Connection Tests
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn connect_with_url() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let engine = SyncEngine::new(SyncConfig::default());
        let result = MqttBroker::builder()
            .url(&format!("mqtt://127.0.0.1:{port}"))
            .unwrap()
            .build(engine.broker_sink())
            .await;

        assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
        let broker = result.unwrap();
        assert!(broker.is_connected());
        assert_eq!(broker.port(), port);
        assert!(!broker.has_credentials());
    }

    #[tokio::test]
    async fn connect_with_host_and_port() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let engine = SyncEngine::new(SyncConfig::default());
        let broker = MqttBroker::builder()
            .host("127.0.0.1")
            .port(port)
            .client_id("z2m_integration")
            .build(engine.broker_sink())
            .await
            .unwrap();

        assert_eq!(broker.host(), "127.0.0.1");
        broker.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let engine = SyncEngine::new(SyncConfig::default());
        let result = MqttBroker::builder()
            .host("127.0.0.1")
            .port(1)
            .connection_timeout(Duration::from_millis(500))
            .build(engine.broker_sink())
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(MqttBroker::builder().url("http://127.0.0.1:1883").is_err());
    }
}

// ============================================================================
// Engine Tests
// ============================================================================

mod engine {
    use super::*;

    #[tokio::test]
    async fn engine_subscribes_bridge_topics() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let engine = SyncEngine::new(SyncConfig::default().with_base_topic("z2m"));
        let mut events = engine.events();
        let broker = MqttBroker::builder()
            .host("127.0.0.1")
            .port(port)
            .build(engine.broker_sink())
            .await
            .unwrap();
        let handle = engine.start(broker.clone());
        handle.flush().await.unwrap();

        let subscriptions = broker.subscriptions();
        assert!(subscriptions.contains(&"z2m/bridge/devices".to_string()));
        assert!(subscriptions.contains(&"z2m/bridge/state".to_string()));

        // The ConnAck seen during build reaches the engine once it starts
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::Connected));

        handle.shutdown().await.unwrap();
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_broker() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let engine = SyncEngine::new(SyncConfig::default());
        let broker = MqttBroker::builder()
            .host("127.0.0.1")
            .port(port)
            .build(engine.broker_sink())
            .await
            .unwrap();

        let result = broker
            .publish(
                "zigbee2mqtt/lamp/set",
                br#"{"state":"ON"}"#.to_vec(),
                QoS::AtLeastOnce,
                false,
            )
            .await;
        assert!(result.is_ok());
    }
}
