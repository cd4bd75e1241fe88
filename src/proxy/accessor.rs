// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kind-checked accessors for single capabilities.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use super::DeviceProxy;
use crate::capability::{Capability, CapabilityKind, Value};
use crate::error::{Result, ValidationError};

mod sealed {
    pub trait Sealed {}
}

/// A capability kind with a native Rust representation.
///
/// Implemented by the marker types in this module; it cannot be implemented
/// outside this crate.
pub trait CapabilityType: sealed::Sealed {
    /// Native type read from and written to the capability.
    type Output;

    /// Kind name used in error messages.
    const NAME: &'static str;

    /// Returns `true` if a capability of `kind` can be accessed as this type.
    fn accepts(kind: &CapabilityKind) -> bool;

    /// Converts a reconciled value to the native type.
    fn from_value(value: Value) -> Option<Self::Output>;

    /// Converts the native type to a value.
    fn into_value(output: Self::Output) -> Value;
}

macro_rules! capability_type {
    ($(#[$doc:meta])* $marker:ident, $output:ty, $name:literal, $pattern:pat, $value:ident => $from:expr, $out:ident => $into:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub enum $marker {}

        impl sealed::Sealed for $marker {}

        impl CapabilityType for $marker {
            type Output = $output;
            const NAME: &'static str = $name;

            fn accepts(kind: &CapabilityKind) -> bool {
                matches!(kind, $pattern)
            }

            fn from_value($value: Value) -> Option<Self::Output> {
                $from
            }

            fn into_value($out: Self::Output) -> Value {
                $into
            }
        }
    };
}

capability_type!(
    /// On/off capabilities, read and written as `bool`.
    Binary, bool, "binary", CapabilityKind::Binary { .. },
    value => value.as_bool(),
    out => Value::Bool(out)
);

capability_type!(
    /// Numeric capabilities, read and written as `f64`.
    Numeric, f64, "numeric", CapabilityKind::Numeric { .. },
    value => value.as_f64(),
    out => Value::Number(out)
);

capability_type!(
    /// Enumerated capabilities, read and written as `String`.
    Enumerated, String, "enum", CapabilityKind::Enum { .. },
    value => match value {
        Value::Text(text) => Some(text),
        _ => None,
    },
    out => Value::Text(out)
);

capability_type!(
    /// Free-form text capabilities.
    Text, String, "text", CapabilityKind::Text,
    value => match value {
        Value::Text(text) => Some(text),
        _ => None,
    },
    out => Value::Text(out)
);

capability_type!(
    /// Composite capabilities, read and written as a member map.
    Composite, BTreeMap<String, Value>, "composite", CapabilityKind::Composite { .. },
    value => match value {
        Value::Composite(members) => Some(members),
        _ => None,
    },
    out => Value::Composite(out)
);

capability_type!(
    /// List capabilities, read and written as a vector of values.
    List, Vec<Value>, "list", CapabilityKind::List { .. },
    value => match value {
        Value::List(items) => Some(items),
        _ => None,
    },
    out => Value::List(out)
);

/// Typed handle to one capability of a [`DeviceProxy`].
///
/// The kind was checked when the accessor was created; reads and writes
/// still go through the proxy, so range checks and staleness apply as usual.
///
/// # Examples
///
/// ```no_run
/// # fn demo(lamp: &z2m_lib::DeviceProxy) -> z2m_lib::Result<()> {
/// let brightness = lamp.numeric("brightness")?;
/// if brightness.get()?.unwrap_or(0.0) < 100.0 {
///     brightness.set(200.0)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Accessor<K: CapabilityType> {
    proxy: DeviceProxy,
    capability: String,
    kind: PhantomData<K>,
}

impl<K: CapabilityType> Accessor<K> {
    pub(crate) fn new(proxy: DeviceProxy, capability: &str) -> Self {
        Self {
            proxy,
            capability: capability.to_string(),
            kind: PhantomData,
        }
    }

    /// The capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.capability
    }

    /// Returns the last reconciled value, or `None` while unknown.
    ///
    /// # Errors
    ///
    /// See [`DeviceProxy::get`].
    pub fn get(&self) -> Result<Option<K::Output>> {
        Ok(self.proxy.get(&self.capability)?.and_then(K::from_value))
    }

    /// Requests a new value.
    ///
    /// # Errors
    ///
    /// See [`DeviceProxy::set`].
    pub fn set(&self, value: impl Into<K::Output>) -> Result<()> {
        self.proxy
            .set(&self.capability, K::into_value(value.into()))
    }

    /// Asks the device to report this capability.
    ///
    /// # Errors
    ///
    /// See [`DeviceProxy::query`].
    pub fn query(&self) -> Result<()> {
        self.proxy.query(&self.capability)
    }
}

impl Accessor<Binary> {
    /// Flips the capability with the device's toggle value.
    ///
    /// # Errors
    ///
    /// See [`DeviceProxy::toggle`].
    pub fn toggle(&self) -> Result<()> {
        self.proxy.toggle(&self.capability)
    }
}

impl Accessor<Numeric> {
    /// Returns the value scaled to `0.0..=1.0` over the declared range.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Unbounded`] without a finite range, or
    /// anything [`DeviceProxy::get`] returns.
    pub fn get_normalised(&self) -> Result<Option<f64>> {
        let (min, max) = self.bounds()?;
        Ok(self.get()?.map(|value| (value - min) / (max - min)))
    }

    /// Writes a fraction of the declared range.
    ///
    /// Ranges with whole-number bounds are written as whole numbers.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Unbounded`] without a finite range, or
    /// anything [`DeviceProxy::set`] returns for the scaled value.
    pub fn set_normalised(&self, fraction: f64) -> Result<()> {
        let (min, max) = self.bounds()?;
        let mut value = fraction * (max - min) + min;
        if min.fract() == 0.0 && max.fract() == 0.0 {
            value = value.round();
        }
        self.set(value)
    }

    /// Writes the last reconciled value plus `delta`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] before the first report, or
    /// anything [`DeviceProxy::set`] returns for the new value.
    pub fn add(&self, delta: f64) -> Result<()> {
        let current = self
            .get()?
            .ok_or_else(|| ValidationError::UnknownValue(self.capability.clone()))?;
        self.set(current + delta)
    }

    /// Moves the value by a fraction of the declared range.
    ///
    /// # Errors
    ///
    /// See [`get_normalised`](Self::get_normalised) and
    /// [`set_normalised`](Self::set_normalised).
    pub fn add_normalised(&self, delta: f64) -> Result<()> {
        let current = self
            .get_normalised()?
            .ok_or_else(|| ValidationError::UnknownValue(self.capability.clone()))?;
        self.set_normalised(current + delta)
    }

    fn bounds(&self) -> Result<(f64, f64)> {
        let descriptor = self.proxy.descriptor()?;
        descriptor
            .capability(&self.capability)
            .and_then(Capability::range)
            .ok_or_else(|| ValidationError::Unbounded(self.capability.clone()).into())
    }
}

impl<K: CapabilityType> Accessor<K>
where
    K::Output: Default,
{
    /// Returns the value, or the type's default while unknown.
    ///
    /// # Errors
    ///
    /// See [`DeviceProxy::get`].
    pub fn get_or_default(&self) -> Result<K::Output> {
        Ok(self.get()?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::event::DeviceId;
    use crate::capability::{Access, Capability, DeviceDescriptor};
    use crate::error::Error;
    use crate::proxy::{ProxyBinding, generate};
    use crate::state::StateSnapshot;
    use crate::sync::{Command, TopicScheme};

    fn lamp() -> (Arc<ProxyBinding>, DeviceProxy, mpsc::Receiver<Command>) {
        let descriptor = DeviceDescriptor::new(
            "0x01",
            "lamp",
            vec![
                Capability::binary("state", Access::ALL),
                Capability::numeric("brightness", Access::ALL, Some(0.0), Some(254.0)),
                Capability::enumerated("power_on_behavior", Access::ALL, ["off", "on", "previous"]),
                Capability::numeric("color_temp", Access::ALL, Some(150.0), None),
            ],
        )
        .unwrap();
        let binding = generate(Arc::new(descriptor), 1, &TopicScheme::default());
        let (tx, rx) = mpsc::channel(8);
        let proxy = DeviceProxy::new(&binding, tx);
        (binding, proxy, rx)
    }

    #[test]
    fn reads_native_values() {
        let (binding, proxy, _rx) = lamp();
        let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "lamp")
            .with_value("state", Value::Bool(true))
            .with_value("brightness", Value::Number(42.0));
        binding.publish_snapshot(Arc::new(snapshot));

        assert_eq!(proxy.binary("state").unwrap().get().unwrap(), Some(true));
        assert_eq!(proxy.numeric("brightness").unwrap().get().unwrap(), Some(42.0));
        assert_eq!(
            proxy.enumerated("power_on_behavior").unwrap().get_or_default().unwrap(),
            ""
        );
    }

    #[test]
    fn writes_go_through_proxy_validation() {
        let (_binding, proxy, mut rx) = lamp();
        let behavior = proxy.enumerated("power_on_behavior").unwrap();
        behavior.set("previous").unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Command::Write { .. }));

        assert!(matches!(behavior.set("sometimes"), Err(Error::Validation(_))));
        assert!(rx.try_recv().is_err());
    }

    fn report(binding: &ProxyBinding, capability: &str, value: f64) {
        let snapshot = StateSnapshot::empty(DeviceId::new("0x01"), "lamp")
            .with_value(capability, Value::Number(value));
        binding.publish_snapshot(Arc::new(snapshot));
    }

    fn written(rx: &mut mpsc::Receiver<Command>) -> Value {
        match rx.try_recv().unwrap() {
            Command::Write { value, .. } => value,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn normalised_values_scale_over_range() {
        let (binding, proxy, mut rx) = lamp();
        let brightness = proxy.numeric("brightness").unwrap();
        assert_eq!(brightness.get_normalised().unwrap(), None);

        report(&binding, "brightness", 127.0);
        assert_eq!(brightness.get_normalised().unwrap(), Some(0.5));

        brightness.set_normalised(0.25).unwrap();
        assert_eq!(written(&mut rx), Value::Number(64.0));

        brightness.add_normalised(0.5).unwrap();
        assert_eq!(written(&mut rx), Value::Number(254.0));

        assert!(matches!(
            brightness.set_normalised(1.5),
            Err(Error::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert!(matches!(
            proxy.numeric("color_temp").unwrap().set_normalised(0.5),
            Err(Error::Validation(ValidationError::Unbounded(_)))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn add_is_relative_to_reported_value() {
        let (binding, proxy, mut rx) = lamp();
        let brightness = proxy.numeric("brightness").unwrap();
        assert!(matches!(
            brightness.add(10.0),
            Err(Error::Validation(ValidationError::UnknownValue(_)))
        ));

        report(&binding, "brightness", 100.0);
        brightness.add(-30.0).unwrap();
        assert_eq!(written(&mut rx), Value::Number(70.0));

        assert!(matches!(
            brightness.add(200.0),
            Err(Error::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn binary_accessor_toggles() {
        let (_binding, proxy, mut rx) = lamp();
        proxy.binary("state").unwrap().toggle().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), Command::Toggle { .. }));
    }

    #[test]
    fn accessor_exposes_its_name() {
        let (_binding, proxy, _rx) = lamp();
        assert_eq!(proxy.numeric("brightness").unwrap().name(), "brightness");
    }
}
