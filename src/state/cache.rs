// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Latest-known device values and pending-write bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use super::StateSnapshot;
use crate::capability::{DeviceDescriptor, Value};
use crate::error::ValidationError;
use crate::event::DeviceId;

/// How a reported value that contradicts a pending write is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The reported value is applied; the write stays pending and keeps
    /// being retried until confirmed or exhausted.
    #[default]
    WireWins,
    /// The reported value is suppressed while the write is pending.
    PendingWins,
}

/// A write that has been requested but not yet confirmed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    capability: String,
    value: Value,
    issued_at: Instant,
    attempts: u32,
    token: u64,
}

impl PendingWrite {
    /// The capability written to.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// The desired value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// When the first write of this intent was requested.
    #[must_use]
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Number of publishes so far; 0 while still inside the debounce window.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Identifies this intent for timers; a superseding intent gets a new one.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Why the cache refused a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The device is not registered.
    UnknownDevice(DeviceId),
    /// The value does not fit the capability.
    Invalid(ValidationError),
}

/// Result of [`StateCache::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The value is now the latest known one.
    Applied {
        /// Snapshot after the apply; identical to the previous one when
        /// nothing changed.
        snapshot: Arc<StateSnapshot>,
        /// The stored value differs from the previous one.
        changed: bool,
        /// The value confirmed a pending write.
        confirmed: bool,
    },
    /// The value was refused; the cache is untouched.
    Rejected(RejectReason),
    /// A pending write takes precedence under [`ConflictPolicy::PendingWins`].
    SupersededByPending,
}

impl ApplyOutcome {
    /// Returns `true` if callbacks should hear about this apply.
    #[must_use]
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Applied { changed, confirmed, .. } if *changed || *confirmed)
    }
}

/// Effect of [`StateCache::begin_write`] on the pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    /// A new intent was recorded; a flush must be scheduled for `token`.
    Scheduled {
        /// Token of the new intent.
        token: u64,
    },
    /// The value replaced one still inside its debounce window.
    Coalesced {
        /// Token of the existing intent.
        token: u64,
    },
}

#[derive(Debug)]
struct DeviceEntry {
    descriptor: Arc<DeviceDescriptor>,
    snapshot: Arc<StateSnapshot>,
    pending: HashMap<String, PendingWrite>,
}

/// Owned store of device values and pending writes.
///
/// The cache only ever holds values that satisfy their capability's
/// constraints; [`apply`](Self::apply) either stores a value completely or
/// leaves everything as it was. There is at most one pending write per
/// device and capability.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use z2m_lib::capability::{Access, Capability, DeviceDescriptor};
/// use z2m_lib::state::{ApplyOutcome, ConflictPolicy, StateCache};
/// use z2m_lib::Value;
///
/// let plug = DeviceDescriptor::new("0x01", "plug", vec![
///     Capability::binary("state", Access::ALL),
/// ]).unwrap();
///
/// let mut cache = StateCache::new(ConflictPolicy::default());
/// cache.register(Arc::new(plug));
///
/// let outcome = cache.apply(&"0x01".into(), "state", Value::Bool(true));
/// assert!(matches!(outcome, ApplyOutcome::Applied { changed: true, .. }));
/// ```
#[derive(Debug)]
pub struct StateCache {
    devices: HashMap<DeviceId, DeviceEntry>,
    conflict_policy: ConflictPolicy,
    next_token: u64,
}

impl StateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(conflict_policy: ConflictPolicy) -> Self {
        Self {
            devices: HashMap::new(),
            conflict_policy,
            next_token: 1,
        }
    }

    /// Returns the conflict policy in effect.
    #[must_use]
    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// Registers a descriptor, discarding any state held for an earlier
    /// descriptor of the same device.
    pub fn register(&mut self, descriptor: Arc<DeviceDescriptor>) -> Arc<StateSnapshot> {
        let snapshot = Arc::new(StateSnapshot::empty(
            descriptor.id().clone(),
            descriptor.friendly_name(),
        ));
        self.devices.insert(
            descriptor.id().clone(),
            DeviceEntry {
                descriptor,
                snapshot: Arc::clone(&snapshot),
                pending: HashMap::new(),
            },
        );
        snapshot
    }

    /// Forgets a device and its pending writes.
    pub fn remove(&mut self, device: &DeviceId) -> Option<Arc<DeviceDescriptor>> {
        self.devices.remove(device).map(|entry| entry.descriptor)
    }

    /// Returns `true` if the device is registered.
    #[must_use]
    pub fn contains(&self, device: &DeviceId) -> bool {
        self.devices.contains_key(device)
    }

    /// Registered devices, in no particular order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.keys()
    }

    /// Returns the registered descriptor of a device.
    #[must_use]
    pub fn descriptor(&self, device: &DeviceId) -> Option<&Arc<DeviceDescriptor>> {
        self.devices.get(device).map(|entry| &entry.descriptor)
    }

    /// Returns the current snapshot of a device.
    #[must_use]
    pub fn snapshot(&self, device: &DeviceId) -> Option<Arc<StateSnapshot>> {
        self.devices.get(device).map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Applies a reported value.
    ///
    /// The value is validated against the capability first; a violation
    /// leaves the cache untouched. A value satisfying the pending write
    /// clears it and is reported as `confirmed`. Re-applying the current
    /// value returns the current snapshot unchanged.
    pub fn apply(&mut self, device: &DeviceId, capability: &str, value: Value) -> ApplyOutcome {
        let Some(entry) = self.devices.get_mut(device) else {
            return ApplyOutcome::Rejected(RejectReason::UnknownDevice(device.clone()));
        };
        let Some(definition) = entry.descriptor.capability(capability) else {
            return ApplyOutcome::Rejected(RejectReason::Invalid(
                ValidationError::UnknownCapability(capability.to_string()),
            ));
        };
        if let Err(err) = definition.validate(&value) {
            return ApplyOutcome::Rejected(RejectReason::Invalid(err));
        }

        let mut confirmed = false;
        if let Some(pending) = entry.pending.get(capability) {
            if value.satisfies(&pending.value) {
                entry.pending.remove(capability);
                confirmed = true;
            } else if self.conflict_policy == ConflictPolicy::PendingWins {
                return ApplyOutcome::SupersededByPending;
            }
        }

        let changed = entry.snapshot.get(capability) != Some(&value);
        if changed || entry.snapshot.is_stale(capability) {
            entry.snapshot = Arc::new(entry.snapshot.with_value(capability, value));
        }

        ApplyOutcome::Applied {
            snapshot: Arc::clone(&entry.snapshot),
            changed,
            confirmed,
        }
    }

    /// Records a write intent for a capability.
    ///
    /// While the existing intent has not been published yet its value is
    /// replaced and its token kept; otherwise a new intent with a fresh
    /// token supersedes it.
    ///
    /// # Errors
    ///
    /// Returns [`RejectReason`] for an unknown device, an unknown or
    /// read-only capability, or a value that fails validation.
    pub fn begin_write(
        &mut self,
        device: &DeviceId,
        capability: &str,
        value: Value,
    ) -> Result<WriteIntent, RejectReason> {
        let entry = self
            .devices
            .get_mut(device)
            .ok_or_else(|| RejectReason::UnknownDevice(device.clone()))?;
        let definition = entry.descriptor.capability(capability).ok_or_else(|| {
            RejectReason::Invalid(ValidationError::UnknownCapability(capability.to_string()))
        })?;
        if !definition.is_writable() {
            return Err(RejectReason::Invalid(ValidationError::NotWritable(
                capability.to_string(),
            )));
        }
        definition.validate(&value).map_err(RejectReason::Invalid)?;

        if let Some(pending) = entry.pending.get_mut(capability)
            && pending.attempts == 0
        {
            pending.value = value;
            return Ok(WriteIntent::Coalesced {
                token: pending.token,
            });
        }

        let token = self.next_token;
        self.next_token += 1;
        entry.pending.insert(
            capability.to_string(),
            PendingWrite {
                capability: capability.to_string(),
                value,
                issued_at: Instant::now(),
                attempts: 0,
                token,
            },
        );
        Ok(WriteIntent::Scheduled { token })
    }

    /// Returns the pending write for a capability.
    #[must_use]
    pub fn pending(&self, device: &DeviceId, capability: &str) -> Option<&PendingWrite> {
        self.devices.get(device)?.pending.get(capability)
    }

    /// Returns all pending writes of a device.
    pub fn pending_writes(&self, device: &DeviceId) -> impl Iterator<Item = &PendingWrite> {
        self.devices
            .get(device)
            .into_iter()
            .flat_map(|entry| entry.pending.values())
    }

    /// Removes and returns the pending write for a capability.
    pub fn take_pending(&mut self, device: &DeviceId, capability: &str) -> Option<PendingWrite> {
        self.devices.get_mut(device)?.pending.remove(capability)
    }

    /// Counts a publish of the pending write identified by `token`.
    ///
    /// Returns the updated write, or `None` if the token no longer matches
    /// (the write was confirmed or superseded).
    pub fn record_attempt(
        &mut self,
        device: &DeviceId,
        capability: &str,
        token: u64,
    ) -> Option<&PendingWrite> {
        let pending = self.devices.get_mut(device)?.pending.get_mut(capability)?;
        if pending.token != token {
            return None;
        }
        pending.attempts += 1;
        Some(pending)
    }

    /// Flags a capability whose value may no longer reflect the device.
    pub fn mark_capability_stale(
        &mut self,
        device: &DeviceId,
        capability: &str,
    ) -> Option<Arc<StateSnapshot>> {
        let entry = self.devices.get_mut(device)?;
        if !entry.snapshot.is_stale(capability) {
            entry.snapshot = Arc::new(entry.snapshot.with_stale(capability));
        }
        Some(Arc::clone(&entry.snapshot))
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Access, Capability};
    use serde_json::json;

    fn lamp_id() -> DeviceId {
        DeviceId::new("0x01")
    }

    fn cache_with(policy: ConflictPolicy) -> StateCache {
        let descriptor = DeviceDescriptor::new(
            lamp_id(),
            "lamp",
            vec![
                Capability::binary("state", Access::ALL),
                Capability::numeric("brightness", Access::ALL, Some(0.0), Some(254.0)),
                Capability::numeric("linkquality", Access::PUBLISHED, Some(0.0), Some(255.0)),
                Capability::composite(
                    "color",
                    Access::ALL,
                    vec![
                        Capability::numeric("x", Access::ALL, Some(0.0), Some(1.0)),
                        Capability::numeric("y", Access::ALL, Some(0.0), Some(1.0)),
                    ],
                ),
            ],
        )
        .unwrap();
        let mut cache = StateCache::new(policy);
        cache.register(Arc::new(descriptor));
        cache
    }

    fn applied(outcome: ApplyOutcome) -> (Arc<StateSnapshot>, bool, bool) {
        match outcome {
            ApplyOutcome::Applied {
                snapshot,
                changed,
                confirmed,
            } => (snapshot, changed, confirmed),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn external_change_is_applied() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        let (snapshot, changed, confirmed) =
            applied(cache.apply(&lamp_id(), "brightness", Value::from(100)));

        assert!(changed);
        assert!(!confirmed);
        assert_eq!(snapshot.get("brightness"), Some(&Value::from(100)));
        assert_eq!(snapshot.sequence(), 1);
    }

    #[test]
    fn repeated_apply_returns_same_snapshot() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        let (first, _, _) = applied(cache.apply(&lamp_id(), "state", Value::Bool(true)));
        let outcome = cache.apply(&lamp_id(), "state", Value::Bool(true));
        assert!(!outcome.should_notify());

        let (second, changed, _) = applied(outcome);
        assert!(!changed);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn invalid_value_leaves_cache_untouched() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache.apply(&lamp_id(), "brightness", Value::from(10));
        let before = cache.snapshot(&lamp_id()).unwrap();

        let outcome = cache.apply(&lamp_id(), "brightness", Value::from(999));
        assert!(matches!(
            outcome,
            ApplyOutcome::Rejected(RejectReason::Invalid(ValidationError::OutOfRange { .. }))
        ));
        assert!(Arc::ptr_eq(&before, &cache.snapshot(&lamp_id()).unwrap()));
    }

    #[test]
    fn unknown_device_and_capability_are_rejected() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        assert!(matches!(
            cache.apply(&DeviceId::new("0xff"), "state", Value::Bool(true)),
            ApplyOutcome::Rejected(RejectReason::UnknownDevice(_))
        ));
        assert!(matches!(
            cache.apply(&lamp_id(), "humidity", Value::from(40)),
            ApplyOutcome::Rejected(RejectReason::Invalid(ValidationError::UnknownCapability(_)))
        ));
    }

    #[tokio::test]
    async fn confirmation_clears_pending() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache
            .begin_write(&lamp_id(), "state", Value::Bool(true))
            .unwrap();
        assert!(cache.pending(&lamp_id(), "state").is_some());

        let (snapshot, changed, confirmed) =
            applied(cache.apply(&lamp_id(), "state", Value::Bool(true)));
        assert!(changed);
        assert!(confirmed);
        assert_eq!(snapshot.get("state"), Some(&Value::Bool(true)));
        assert!(cache.pending(&lamp_id(), "state").is_none());
    }

    #[tokio::test]
    async fn confirmation_of_unchanged_value_is_reported() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache.apply(&lamp_id(), "state", Value::Bool(true));
        cache
            .begin_write(&lamp_id(), "state", Value::Bool(true))
            .unwrap();

        let outcome = cache.apply(&lamp_id(), "state", Value::Bool(true));
        assert!(outcome.should_notify());
        let (_, changed, confirmed) = applied(outcome);
        assert!(!changed);
        assert!(confirmed);
    }

    #[tokio::test]
    async fn composite_confirmed_by_superset() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        let desired = Value::from_json(&json!({"x": 0.3})).unwrap();
        cache.begin_write(&lamp_id(), "color", desired).unwrap();

        let reported = Value::from_json(&json!({"x": 0.3, "y": 0.5})).unwrap();
        let (_, _, confirmed) = applied(cache.apply(&lamp_id(), "color", reported));
        assert!(confirmed);
    }

    #[tokio::test]
    async fn wire_wins_keeps_write_pending() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache
            .begin_write(&lamp_id(), "brightness", Value::from(200))
            .unwrap();

        let (snapshot, changed, confirmed) =
            applied(cache.apply(&lamp_id(), "brightness", Value::from(50)));
        assert!(changed);
        assert!(!confirmed);
        assert_eq!(snapshot.get("brightness"), Some(&Value::from(50)));
        assert_eq!(
            cache.pending(&lamp_id(), "brightness").unwrap().value(),
            &Value::from(200)
        );
    }

    #[tokio::test]
    async fn pending_wins_suppresses_wire_value() {
        let mut cache = cache_with(ConflictPolicy::PendingWins);
        cache
            .begin_write(&lamp_id(), "brightness", Value::from(200))
            .unwrap();

        assert_eq!(
            cache.apply(&lamp_id(), "brightness", Value::from(50)),
            ApplyOutcome::SupersededByPending
        );
        assert!(cache.snapshot(&lamp_id()).unwrap().get("brightness").is_none());
    }

    #[tokio::test]
    async fn writes_inside_debounce_window_coalesce() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        let first = cache
            .begin_write(&lamp_id(), "brightness", Value::from(10))
            .unwrap();
        let WriteIntent::Scheduled { token } = first else {
            panic!("first write must schedule a flush");
        };

        let second = cache
            .begin_write(&lamp_id(), "brightness", Value::from(20))
            .unwrap();
        assert_eq!(second, WriteIntent::Coalesced { token });
        assert_eq!(
            cache.pending(&lamp_id(), "brightness").unwrap().value(),
            &Value::from(20)
        );
    }

    #[tokio::test]
    async fn write_after_publish_supersedes() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        let WriteIntent::Scheduled { token } = cache
            .begin_write(&lamp_id(), "brightness", Value::from(10))
            .unwrap()
        else {
            panic!("expected a scheduled write");
        };
        assert_eq!(
            cache
                .record_attempt(&lamp_id(), "brightness", token)
                .unwrap()
                .attempts(),
            1
        );

        let next = cache
            .begin_write(&lamp_id(), "brightness", Value::from(20))
            .unwrap();
        assert!(matches!(next, WriteIntent::Scheduled { token: t } if t != token));
        assert!(cache.record_attempt(&lamp_id(), "brightness", token).is_none());
    }

    #[tokio::test]
    async fn read_only_capability_cannot_be_written() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        assert_eq!(
            cache.begin_write(&lamp_id(), "linkquality", Value::from(1)),
            Err(RejectReason::Invalid(ValidationError::NotWritable(
                "linkquality".to_string()
            )))
        );
    }

    #[test]
    fn stale_flag_is_cleared_by_fresh_value() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache.apply(&lamp_id(), "state", Value::Bool(true));
        let stale = cache.mark_capability_stale(&lamp_id(), "state").unwrap();
        assert!(stale.is_stale("state"));

        let (snapshot, changed, _) = applied(cache.apply(&lamp_id(), "state", Value::Bool(true)));
        assert!(!changed);
        assert!(!snapshot.is_stale("state"));
    }

    #[tokio::test]
    async fn register_replaces_state() {
        let mut cache = cache_with(ConflictPolicy::WireWins);
        cache.apply(&lamp_id(), "state", Value::Bool(true));
        cache
            .begin_write(&lamp_id(), "brightness", Value::from(5))
            .unwrap();

        let descriptor = Arc::clone(cache.descriptor(&lamp_id()).unwrap());
        let fresh = cache.register(descriptor);
        assert_eq!(fresh.sequence(), 0);
        assert_eq!(cache.pending_writes(&lamp_id()).count(), 0);

        assert!(cache.remove(&lamp_id()).is_some());
        assert!(!cache.contains(&lamp_id()));
    }
}
