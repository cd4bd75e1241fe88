// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability definitions, access bits and the per-capability wire codec.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde_json::Value as Json;

use super::Value;
use crate::error::ValidationError;

/// Access bitmask as published by the bridge.
///
/// Bit 1 means the property appears in state payloads, bit 2 that it can be
/// written through `/set`, bit 4 that it can be requested through `/get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access(u8);

impl Access {
    /// The property is published in state payloads.
    pub const PUBLISHED: Self = Self(0b001);
    /// The property can be written through `/set`.
    pub const SET: Self = Self(0b010);
    /// The property can be requested through `/get`.
    pub const GET: Self = Self(0b100);
    /// All access bits.
    pub const ALL: Self = Self(0b111);

    /// Creates an access value from raw bits; unknown bits are ignored.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if values can be observed, either pushed or queried.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::PUBLISHED) || self.contains(Self::GET)
    }

    /// Returns `true` if values can be written.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::SET)
    }

    /// Returns `true` if values can be requested through `/get`.
    #[must_use]
    pub const fn is_queryable(self) -> bool {
        self.contains(Self::GET)
    }

    /// Returns the coarse access mode.
    #[must_use]
    pub const fn mode(self) -> AccessMode {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => AccessMode::ReadWrite,
            (false, true) => AccessMode::WriteOnly,
            _ => AccessMode::ReadOnly,
        }
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::PUBLISHED
    }
}

impl BitOr for Access {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Coarse access mode derived from [`Access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reported by the device, cannot be written.
    ReadOnly,
    /// Accepted by the device, never reported back.
    WriteOnly,
    /// Reported and writable.
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Kind of a capability together with its value constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityKind {
    /// Two-state value with device-specific wire representations.
    Binary {
        /// Wire value meaning "on".
        value_on: Json,
        /// Wire value meaning "off".
        value_off: Json,
        /// Wire value requesting a toggle, if the device supports it.
        value_toggle: Option<Json>,
    },
    /// Number with an optional inclusive range.
    Numeric {
        /// Inclusive minimum.
        min: Option<f64>,
        /// Inclusive maximum.
        max: Option<f64>,
        /// Advisory step size; not enforced.
        step: Option<f64>,
    },
    /// One of a fixed set of strings.
    Enum {
        /// Allowed values, in declaration order.
        values: Vec<String>,
    },
    /// Free-form text.
    Text,
    /// Structured value made of named members.
    Composite {
        /// Member capabilities.
        features: Vec<Capability>,
    },
    /// Sequence of values sharing one item capability.
    List {
        /// Capability describing each item.
        item: Box<Capability>,
        /// Minimum number of items.
        length_min: Option<usize>,
        /// Maximum number of items.
        length_max: Option<usize>,
    },
}

impl CapabilityKind {
    /// Returns the kind name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "binary",
            Self::Numeric { .. } => "numeric",
            Self::Enum { .. } => "enum",
            Self::Text => "text",
            Self::Composite { .. } => "composite",
            Self::List { .. } => "list",
        }
    }
}

/// One exposed device capability.
///
/// Capabilities are built by [`DeviceDescriptor::parse`](super::DeviceDescriptor::parse)
/// and never change afterwards; a device whose capabilities change is
/// ingested as a new descriptor.
///
/// # Examples
///
/// ```
/// use z2m_lib::capability::{Access, Capability};
/// use z2m_lib::Value;
///
/// let brightness = Capability::numeric("brightness", Access::ALL, Some(0.0), Some(254.0));
/// assert!(brightness.validate(&Value::from(128)).is_ok());
/// assert!(brightness.validate(&Value::from(300)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    name: String,
    label: Option<String>,
    description: Option<String>,
    unit: Option<String>,
    endpoint: Option<String>,
    access: Access,
    kind: CapabilityKind,
}

impl Capability {
    /// Creates a capability of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, access: Access, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: None,
            unit: None,
            endpoint: None,
            access,
            kind,
        }
    }

    /// Creates a binary capability using the bridge's usual `"ON"`/`"OFF"`.
    #[must_use]
    pub fn binary(name: impl Into<String>, access: Access) -> Self {
        Self::new(
            name,
            access,
            CapabilityKind::Binary {
                value_on: Json::from("ON"),
                value_off: Json::from("OFF"),
                value_toggle: Some(Json::from("TOGGLE")),
            },
        )
    }

    /// Creates a numeric capability.
    #[must_use]
    pub fn numeric(
        name: impl Into<String>,
        access: Access,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        Self::new(
            name,
            access,
            CapabilityKind::Numeric {
                min,
                max,
                step: None,
            },
        )
    }

    /// Creates an enumerated capability.
    #[must_use]
    pub fn enumerated<I, S>(name: impl Into<String>, access: Access, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            access,
            CapabilityKind::Enum {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Creates a free-form text capability.
    #[must_use]
    pub fn text(name: impl Into<String>, access: Access) -> Self {
        Self::new(name, access, CapabilityKind::Text)
    }

    /// Creates a composite capability from its members.
    #[must_use]
    pub fn composite(name: impl Into<String>, access: Access, features: Vec<Capability>) -> Self {
        Self::new(name, access, CapabilityKind::Composite { features })
    }

    /// Creates a list capability with unbounded length.
    #[must_use]
    pub fn list(name: impl Into<String>, access: Access, item: Capability) -> Self {
        Self::new(
            name,
            access,
            CapabilityKind::List {
                item: Box::new(item),
                length_min: None,
                length_max: None,
            },
        )
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the human-readable label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Property name, unique within the device.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Description supplied by the device definition.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Unit of measurement.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Device endpoint the capability belongs to.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Access bits.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Coarse access mode.
    #[must_use]
    pub fn access_mode(&self) -> AccessMode {
        self.access.mode()
    }

    /// Kind and constraints.
    #[must_use]
    pub fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    /// Returns `true` if the capability can be read.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.access.is_readable()
    }

    /// Returns `true` if the capability can be written.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.access.is_writable()
    }

    /// Returns `true` if the capability can be queried through `/get`.
    #[must_use]
    pub fn is_queryable(&self) -> bool {
        self.access.is_queryable()
    }

    /// Wire value requesting a toggle, for binary capabilities that have one.
    #[must_use]
    pub fn value_toggle(&self) -> Option<&Json> {
        match &self.kind {
            CapabilityKind::Binary { value_toggle, .. } => value_toggle.as_ref(),
            _ => None,
        }
    }

    /// Inclusive `(min, max)` of a numeric capability with a non-empty range.
    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        match self.kind {
            CapabilityKind::Numeric {
                min: Some(min),
                max: Some(max),
                ..
            } if max > min => Some((min, max)),
            _ => None,
        }
    }

    /// Returns a composite member by name.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&Capability> {
        match &self.kind {
            CapabilityKind::Composite { features } => features.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    pub(crate) fn merge_features(&mut self, other: Capability) -> bool {
        let CapabilityKind::Composite { features } = &mut self.kind else {
            return false;
        };
        let CapabilityKind::Composite {
            features: incoming,
        } = other.kind
        else {
            return false;
        };
        for feature in incoming {
            if !features.iter().any(|f| f.name == feature.name) {
                features.push(feature);
            }
        }
        self.access = self.access | other.access;
        true
    }

    /// Checks that a value has the right kind and fits the constraints.
    ///
    /// Composite members and list items are checked recursively.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match (&self.kind, value) {
            (CapabilityKind::Binary { .. }, Value::Bool(_)) | (CapabilityKind::Text, Value::Text(_)) => {
                Ok(())
            }
            (CapabilityKind::Numeric { min, max, .. }, Value::Number(n)) => {
                if !n.is_finite() {
                    return Err(ValidationError::NotFinite(self.name.clone()));
                }
                let below = min.is_some_and(|min| *n < min);
                let above = max.is_some_and(|max| *n > max);
                if below || above {
                    return Err(ValidationError::OutOfRange {
                        capability: self.name.clone(),
                        min: *min,
                        max: *max,
                        actual: *n,
                    });
                }
                Ok(())
            }
            (CapabilityKind::Enum { values }, Value::Text(s)) => {
                if values.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(ValidationError::NotAllowed {
                        capability: self.name.clone(),
                        value: s.clone(),
                    })
                }
            }
            (CapabilityKind::Composite { features }, Value::Composite(members)) => {
                for (field, member) in members {
                    let feature = features.iter().find(|f| &f.name == field).ok_or_else(|| {
                        ValidationError::UnknownField {
                            capability: self.name.clone(),
                            field: field.clone(),
                        }
                    })?;
                    feature.validate(member)?;
                }
                Ok(())
            }
            (
                CapabilityKind::List {
                    item,
                    length_min,
                    length_max,
                },
                Value::List(items),
            ) => {
                let len = items.len();
                if length_min.is_some_and(|min| len < min) || length_max.is_some_and(|max| len > max) {
                    return Err(ValidationError::InvalidLength {
                        capability: self.name.clone(),
                        len,
                    });
                }
                items.iter().try_for_each(|v| item.validate(v))
            }
            (kind, value) => Err(ValidationError::WrongKind {
                capability: self.name.clone(),
                expected: kind.name(),
                actual: value.kind_name(),
            }),
        }
    }

    /// Decodes a wire value reported by the device.
    ///
    /// Returns `None` when the device reports `null` ("unknown"). Binary wire
    /// values are mapped to booleans; anything else is converted as-is and
    /// left for [`validate`](Self::validate) to judge. Composite members the
    /// capability does not declare are dropped.
    #[must_use]
    pub fn decode(&self, raw: &Json) -> Option<Value> {
        if raw.is_null() {
            return None;
        }
        match &self.kind {
            CapabilityKind::Binary {
                value_on,
                value_off,
                ..
            } => {
                if raw == value_on {
                    Some(Value::Bool(true))
                } else if raw == value_off {
                    Some(Value::Bool(false))
                } else {
                    Value::from_json(raw)
                }
            }
            CapabilityKind::Composite { features } => match raw {
                Json::Object(map) => {
                    let members: BTreeMap<String, Value> = map
                        .iter()
                        .filter_map(|(k, v)| {
                            let feature = features.iter().find(|f| &f.name == k)?;
                            feature.decode(v).map(|v| (k.clone(), v))
                        })
                        .collect();
                    Some(Value::Composite(members))
                }
                other => Value::from_json(other),
            },
            CapabilityKind::List { item, .. } => match raw {
                Json::Array(items) => Some(Value::List(
                    items.iter().filter_map(|v| item.decode(v)).collect(),
                )),
                other => Value::from_json(other),
            },
            _ => Value::from_json(raw),
        }
    }

    /// Encodes a value for a `/set` payload.
    ///
    /// The value is expected to have passed [`validate`](Self::validate).
    #[must_use]
    pub fn encode(&self, value: &Value) -> Json {
        match (&self.kind, value) {
            (
                CapabilityKind::Binary {
                    value_on,
                    value_off,
                    ..
                },
                Value::Bool(on),
            ) => {
                if *on {
                    value_on.clone()
                } else {
                    value_off.clone()
                }
            }
            (CapabilityKind::Composite { features }, Value::Composite(members)) => Json::Object(
                members
                    .iter()
                    .map(|(k, v)| {
                        let json = features
                            .iter()
                            .find(|f| &f.name == k)
                            .map_or_else(|| v.to_json(), |f| f.encode(v));
                        (k.clone(), json)
                    })
                    .collect(),
            ),
            (CapabilityKind::List { item, .. }, Value::List(items)) => {
                Json::Array(items.iter().map(|v| item.encode(v)).collect())
            }
            (_, value) => value.to_json(),
        }
    }
}
