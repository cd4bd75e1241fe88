// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization engine configuration.

use std::time::Duration;

use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::protocol::QoS;
use crate::state::ConflictPolicy;

/// Default base topic of the bridge.
pub const DEFAULT_BASE_TOPIC: &str = "zigbee2mqtt";

/// Configuration of a [`SyncEngine`](super::SyncEngine).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use z2m_lib::sync::{RetryPolicy, SyncConfig};
///
/// let config = SyncConfig::new()
///     .with_base_topic("z2m")
///     .with_debounce(Duration::from_millis(100))
///     .with_retry(RetryPolicy::new().with_max_attempts(5));
///
/// assert_eq!(config.base_topic, "z2m");
/// assert_eq!(config.retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base topic the bridge publishes under.
    pub base_topic: String,
    /// Window, measured from the first write, in which writes to one
    /// capability collapse into a single publish.
    pub debounce: Duration,
    /// Republishing of unconfirmed writes.
    pub retry: RetryPolicy,
    /// Treatment of reported values contradicting a pending write.
    pub conflict_policy: ConflictPolicy,
    /// Capacity of the engine command queue.
    pub queue_capacity: usize,
    /// Events buffered per [`SyncEvent`](crate::event::SyncEvent) receiver.
    pub event_capacity: usize,
    /// Query every queryable capability after each (re)connect and when a
    /// device appears.
    pub query_on_connect: bool,
    /// Delivery guarantee for `/set` and `/get` publishes.
    pub qos: QoS,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            debounce: Duration::from_millis(50),
            retry: RetryPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            queue_capacity: 1024,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            query_on_connect: true,
            qos: QoS::AtLeastOnce,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base topic.
    #[must_use]
    pub fn with_base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = base_topic.into();
        self
    }

    /// Sets the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the command queue capacity (minimum 1).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the event buffer per receiver (minimum 1).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enables or disables querying after connect.
    #[must_use]
    pub fn with_query_on_connect(mut self, enabled: bool) -> Self {
        self.query_on_connect = enabled;
        self
    }

    /// Sets the delivery guarantee for outgoing messages.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

/// Bounded exponential backoff for unconfirmed writes.
///
/// `max_attempts` counts publishes, including the first one. After the last
/// publish the engine waits one more delay for a confirmation before giving
/// up.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use z2m_lib::sync::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// assert!(policy.should_retry(2));
/// assert!(!policy.should_retry(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of publishes per write.
    pub max_attempts: u32,
    /// Wait after the first publish.
    pub initial_delay: Duration,
    /// Upper bound for any wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of publishes (minimum 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the wait after the first publish.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum wait.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns how long to wait for a confirmation after publish number
    /// `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt - 1).unwrap_or(i32::MAX));

        // Safe: initial_delay is typically seconds, not near u128 max
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f64 * multiplier;

        if !delay_ms.is_finite() {
            return self.max_delay;
        }

        // Safe: delay_ms is positive and finite here
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Returns `true` if another publish may follow `attempts` publishes.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.base_topic, "zigbee2mqtt");
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.conflict_policy, ConflictPolicy::WireWins);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.event_capacity, 256);
        assert!(config.query_on_connect);
        assert_eq!(config.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn config_builder_chain() {
        let config = SyncConfig::new()
            .with_conflict_policy(ConflictPolicy::PendingWins)
            .with_queue_capacity(0)
            .with_event_capacity(8)
            .with_query_on_connect(false)
            .with_qos(QoS::ExactlyOnce);

        assert_eq!(config.conflict_policy, ConflictPolicy::PendingWins);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.event_capacity, 8);
        assert!(!config.query_on_connect);
        assert_eq!(config.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn retry_delays_grow_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::new().with_max_attempts(2);
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(RetryPolicy::new().with_max_attempts(0).max_attempts, 1);
    }
}
