// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value as Json;

/// Largest integer magnitude that survives a round trip through `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Tolerance used when comparing a reported number against a requested one.
const NUMBER_TOLERANCE: f64 = 1e-9;

/// A decoded capability value.
///
/// Values are always interpreted through a [`Capability`](super::Capability):
/// binary capabilities hold [`Value::Bool`] regardless of whether the device
/// speaks `"ON"`/`"OFF"` or `true`/`false` on the wire, and enumerated values
/// are [`Value::Text`].
///
/// # Examples
///
/// ```
/// use z2m_lib::Value;
///
/// let on = Value::from(true);
/// assert_eq!(on.as_bool(), Some(true));
///
/// let level = Value::from(128);
/// assert_eq!(level.as_f64(), Some(128.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Binary state.
    Bool(bool),
    /// Numeric reading or setting.
    Number(f64),
    /// Enumerated or free-form text.
    Text(String),
    /// Composite value keyed by member property.
    Composite(BTreeMap<String, Value>),
    /// List of item values.
    List(Vec<Value>),
}

impl Value {
    /// Returns a short name for the shape of this value.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "binary",
            Self::Number(_) => "numeric",
            Self::Text(_) => "text",
            Self::Composite(_) => "composite",
            Self::List(_) => "list",
        }
    }

    /// Returns the boolean, if this is a binary value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is a numeric value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text, if this is a text or enumerated value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the members, if this is a composite value.
    #[must_use]
    pub fn as_composite(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Composite(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the items, if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts plain JSON into a value without capability context.
    ///
    /// Returns `None` for `null`, which the bridge uses for "unknown".
    /// `null` members and items inside containers are dropped.
    #[must_use]
    pub fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::Null => None,
            Json::Bool(b) => Some(Self::Bool(*b)),
            Json::Number(n) => n.as_f64().map(Self::Number),
            Json::String(s) => Some(Self::Text(s.clone())),
            Json::Array(items) => Some(Self::List(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            Json::Object(map) => Some(Self::Composite(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Converts the value to plain JSON.
    ///
    /// Integral numbers are emitted as JSON integers because devices reject
    /// `254.0` where they expect `254`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Text(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Composite(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Returns `true` if this (reported) value fulfils a `desired` value.
    ///
    /// Composite values match when every member of `desired` is matched;
    /// devices commonly echo a color with more members than were written.
    #[must_use]
    pub fn satisfies(&self, desired: &Value) -> bool {
        match (self, desired) {
            (Self::Number(a), Self::Number(b)) => (a - b).abs() <= NUMBER_TOLERANCE,
            (Self::Composite(actual), Self::Composite(wanted)) => wanted
                .iter()
                .all(|(k, w)| actual.get(k).is_some_and(|a| a.satisfies(w))),
            (Self::List(actual), Self::List(wanted)) => {
                actual.len() == wanted.len()
                    && actual.iter().zip(wanted).all(|(a, w)| a.satisfies(w))
            }
            (a, b) => a == b,
        }
    }
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        // Safe: integral and within the exactly representable range
        #[allow(clippy::cast_possible_truncation)]
        let int = n as i64;
        Json::from(int)
    } else {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Serializes in the bridge's wire form: whole numbers carry no fraction.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Composite(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_maps_shapes() {
        assert_eq!(Value::from_json(&json!(true)), Some(Value::Bool(true)));
        assert_eq!(Value::from_json(&json!(12)), Some(Value::Number(12.0)));
        assert_eq!(Value::from_json(&json!("ON")), Some(Value::from("ON")));
        assert_eq!(Value::from_json(&json!(null)), None);
    }

    #[test]
    fn from_json_drops_null_members() {
        let value = Value::from_json(&json!({"x": 0.3, "y": null})).unwrap();
        let members = value.as_composite().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members.get("x"), Some(&Value::Number(0.3)));
    }

    #[test]
    fn integral_numbers_encode_as_integers() {
        assert_eq!(Value::Number(254.0).to_json(), json!(254));
        assert_eq!(Value::Number(0.25).to_json(), json!(0.25));
        assert_eq!(Value::Number(-3.0).to_json().to_string(), "-3");
    }

    #[test]
    fn non_finite_numbers_encode_as_null() {
        assert_eq!(Value::Number(f64::NAN).to_json(), Json::Null);
    }

    #[test]
    fn composite_satisfied_by_superset() {
        let reported = Value::from_json(&json!({"x": 0.3, "y": 0.4, "hue": 20})).unwrap();
        let desired = Value::from_json(&json!({"x": 0.3, "y": 0.4})).unwrap();
        assert!(reported.satisfies(&desired));
        assert!(!desired.satisfies(&reported));
    }

    #[test]
    fn numbers_compare_with_tolerance() {
        assert!(Value::Number(0.1 + 0.2).satisfies(&Value::Number(0.3)));
        assert!(!Value::Number(1.0).satisfies(&Value::Number(2.0)));
    }

    #[test]
    fn display_is_json() {
        assert_eq!(Value::from("ON").to_string(), "\"ON\"");
        assert_eq!(Value::from(true).to_string(), "true");
    }

    #[test]
    fn serializes_like_the_wire() {
        assert_eq!(serde_json::to_string(&Value::from(254)).unwrap(), "254");
        assert_eq!(serde_json::to_string(&Value::Number(0.25)).unwrap(), "0.25");

        let color = Value::Composite(BTreeMap::from([
            ("x".to_string(), Value::Number(0.3)),
            ("hue".to_string(), Value::from(120)),
        ]));
        assert_eq!(serde_json::to_string(&color).unwrap(), r#"{"hue":120,"x":0.3}"#);
    }
}
