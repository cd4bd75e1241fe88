// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device descriptor ingestion from the bridge device list.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::Deserialize;
use serde_json::Value as Json;

use super::{Access, Capability, CapabilityKind, MAX_NESTING_DEPTH};
use crate::error::ParseError;
use crate::event::DeviceId;

/// Expose types whose features are lifted to top-level capabilities.
const CONTAINER_KINDS: &[&str] = &["light", "switch", "fan", "cover", "lock", "climate"];

#[derive(Debug, Deserialize)]
struct RawDevice {
    ieee_address: String,
    friendly_name: String,
    #[serde(default)]
    definition: Option<RawDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    exposes: Vec<Json>,
}

#[derive(Debug, Deserialize)]
struct RawExpose {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    access: Option<u8>,
    #[serde(default)]
    value_on: Option<Json>,
    #[serde(default)]
    value_off: Option<Json>,
    #[serde(default)]
    value_toggle: Option<Json>,
    #[serde(default)]
    value_min: Option<f64>,
    #[serde(default)]
    value_max: Option<f64>,
    #[serde(default)]
    value_step: Option<f64>,
    #[serde(default)]
    values: Option<Vec<Json>>,
    #[serde(default)]
    features: Option<Vec<RawExpose>>,
    #[serde(default)]
    item_type: Option<Box<RawExpose>>,
    #[serde(default)]
    length_min: Option<usize>,
    #[serde(default)]
    length_max: Option<usize>,
}

impl RawExpose {
    fn display_name(&self) -> String {
        self.property
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_default()
    }
}

/// Everything known about one bridged device.
///
/// A descriptor is immutable. When the bridge republishes the device list
/// with a different friendly name or different exposes, a new descriptor is
/// built and the old one is retired; the [`fingerprint`](Self::fingerprint)
/// detects the latter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    id: DeviceId,
    friendly_name: String,
    vendor: Option<String>,
    model: Option<String>,
    description: Option<String>,
    capabilities: Vec<Capability>,
    fingerprint: u64,
}

impl DeviceDescriptor {
    /// Builds a descriptor from already-constructed capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::DuplicateCapability`] if two capabilities share
    /// a name.
    pub fn new(
        id: impl Into<DeviceId>,
        friendly_name: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> Result<Self, ParseError> {
        let mut seen = std::collections::HashSet::new();
        for capability in &capabilities {
            if !seen.insert(capability.name()) {
                return Err(ParseError::DuplicateCapability(capability.name().to_string()));
            }
        }
        let mut hasher = DefaultHasher::new();
        format!("{capabilities:?}").hash(&mut hasher);
        Ok(Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            vendor: None,
            model: None,
            description: None,
            capabilities,
            fingerprint: hasher.finish(),
        })
    }

    /// Parses one entry of the bridge device list.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidDevice`] wrapping the underlying cause
    /// when the entry is malformed, lacks a definition, or declares an
    /// unsupported or inconsistent expose.
    pub fn parse(raw: &Json) -> Result<Self, ParseError> {
        let address = raw
            .get("ieee_address")
            .and_then(Json::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        Self::parse_inner(raw).map_err(|source| ParseError::InvalidDevice {
            device: address,
            source: Box::new(source),
        })
    }

    fn parse_inner(raw: &Json) -> Result<Self, ParseError> {
        let device = RawDevice::deserialize(raw)?;
        let definition = device
            .definition
            .ok_or_else(|| ParseError::MissingField("definition".to_string()))?;

        let mut hasher = DefaultHasher::new();
        serde_json::to_string(&definition.exposes)?.hash(&mut hasher);
        let fingerprint = hasher.finish();

        let mut capabilities = Vec::new();
        for expose in &definition.exposes {
            let expose = RawExpose::deserialize(expose)?;
            collect(expose, 0, &mut capabilities)?;
        }

        Ok(Self {
            id: DeviceId::new(device.ieee_address),
            friendly_name: device.friendly_name,
            vendor: definition.vendor,
            model: definition.model,
            description: definition.description,
            capabilities,
            fingerprint,
        })
    }

    /// Sets vendor and model.
    #[must_use]
    pub fn with_model(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self.model = Some(model.into());
        self
    }

    /// IEEE address.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Friendly name, also the state topic suffix.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Vendor name.
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Model description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Capabilities in declaration order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Looks up a capability by property name.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    /// Hash of the raw exposes document.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Returns `true` if `other` describes the same device generation.
    #[must_use]
    pub fn same_generation(&self, other: &Self) -> bool {
        self.id == other.id
            && self.friendly_name == other.friendly_name
            && self.fingerprint == other.fingerprint
    }
}

/// Parses the payload of `<base>/bridge/devices`.
///
/// Entries without a definition (the coordinator, devices still being
/// interviewed) are skipped. Each remaining entry is parsed on its own so a
/// single malformed device does not hide the others.
///
/// # Errors
///
/// Fails as a whole only when the payload is not a JSON array.
///
/// # Examples
///
/// ```
/// use z2m_lib::capability::parse_device_list;
///
/// let payload = br#"[
///     {"ieee_address": "0x00", "friendly_name": "Coordinator", "type": "Coordinator"},
///     {"ieee_address": "0x01", "friendly_name": "plug", "definition": {
///         "model": "SP 120", "vendor": "IKEA", "exposes": [
///             {"type": "switch", "features": [
///                 {"type": "binary", "property": "state", "access": 7,
///                  "value_on": "ON", "value_off": "OFF"}
///             ]}
///         ]
///     }}
/// ]"#;
/// let devices = parse_device_list(payload).unwrap();
/// assert_eq!(devices.len(), 1);
/// let plug = devices[0].as_ref().unwrap();
/// assert!(plug.capability("state").is_some());
/// ```
pub fn parse_device_list(
    payload: &[u8],
) -> Result<Vec<Result<DeviceDescriptor, ParseError>>, ParseError> {
    let entries: Vec<Json> = serde_json::from_slice(payload)?;
    Ok(entries
        .iter()
        .filter(|entry| entry.get("definition").is_some_and(|d| !d.is_null()))
        .map(DeviceDescriptor::parse)
        .collect())
}

fn collect(raw: RawExpose, depth: usize, out: &mut Vec<Capability>) -> Result<(), ParseError> {
    if CONTAINER_KINDS.contains(&raw.kind.as_str()) {
        if depth > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep {
                capability: raw.display_name(),
                limit: MAX_NESTING_DEPTH,
            });
        }
        for feature in raw.features.unwrap_or_default() {
            collect(feature, depth + 1, out)?;
        }
        return Ok(());
    }

    let capability = build(raw, depth)?;
    if let Some(existing) = out.iter_mut().find(|c| c.name() == capability.name()) {
        // Lights expose color_xy and color_hs under the same "color" property
        let name = capability.name().to_string();
        if !existing.merge_features(capability) {
            return Err(ParseError::DuplicateCapability(name));
        }
        return Ok(());
    }
    out.push(capability);
    Ok(())
}

fn build(raw: RawExpose, depth: usize) -> Result<Capability, ParseError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep {
            capability: raw.display_name(),
            limit: MAX_NESTING_DEPTH,
        });
    }

    let name = raw
        .property
        .clone()
        .or_else(|| raw.name.clone())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::MissingField(format!("property of {} expose", raw.kind)))?;
    let access = Access::from_bits(raw.access.unwrap_or(Access::PUBLISHED.bits()));

    let kind = match raw.kind.as_str() {
        "binary" => CapabilityKind::Binary {
            value_on: raw
                .value_on
                .ok_or_else(|| ParseError::MissingField(format!("{name}.value_on")))?,
            value_off: raw
                .value_off
                .ok_or_else(|| ParseError::MissingField(format!("{name}.value_off")))?,
            value_toggle: raw.value_toggle,
        },
        "numeric" => {
            if let (Some(min), Some(max)) = (raw.value_min, raw.value_max)
                && min > max
            {
                return Err(ParseError::InvalidRange {
                    capability: name,
                    min,
                    max,
                });
            }
            CapabilityKind::Numeric {
                min: raw.value_min,
                max: raw.value_max,
                step: raw.value_step,
            }
        }
        "enum" => {
            let values: Vec<String> = raw
                .values
                .unwrap_or_default()
                .into_iter()
                .map(|v| match v {
                    Json::String(s) => s,
                    other => other.to_string(),
                })
                .collect();
            if values.is_empty() {
                return Err(ParseError::EmptyEnum(name));
            }
            CapabilityKind::Enum { values }
        }
        "text" => CapabilityKind::Text,
        "composite" => {
            let mut features = Vec::new();
            for feature in raw.features.unwrap_or_default() {
                collect(feature, depth + 1, &mut features)?;
            }
            CapabilityKind::Composite { features }
        }
        "list" => {
            let item = raw
                .item_type
                .ok_or_else(|| ParseError::MissingField(format!("{name}.item_type")))?;
            let mut item = *item;
            // Item exposes are often anonymous
            if item.property.is_none() && item.name.is_none() {
                item.name = Some(name.clone());
            }
            CapabilityKind::List {
                item: Box::new(build(item, depth + 1)?),
                length_min: raw.length_min,
                length_max: raw.length_max,
            }
        }
        other => {
            return Err(ParseError::UnknownKind {
                capability: name,
                kind: other.to_string(),
            });
        }
    };

    let mut capability = Capability::new(name, access, kind);
    if let Some(label) = raw.label {
        capability = capability.with_label(label);
    }
    if let Some(description) = raw.description {
        capability = capability.with_description(description);
    }
    if let Some(unit) = raw.unit {
        capability = capability.with_unit(unit);
    }
    if let Some(endpoint) = raw.endpoint {
        capability = capability.with_endpoint(endpoint);
    }
    Ok(capability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(exposes: Json) -> Json {
        json!({
            "ieee_address": "0x00158d0001",
            "friendly_name": "living_room_lamp",
            "definition": {
                "model": "LED1545G12",
                "vendor": "IKEA",
                "description": "TRADFRI bulb",
                "exposes": exposes
            }
        })
    }

    fn light_exposes() -> Json {
        json!([
            {"type": "light", "features": [
                {"type": "binary", "name": "state", "property": "state", "access": 7,
                 "value_on": "ON", "value_off": "OFF", "value_toggle": "TOGGLE"},
                {"type": "numeric", "name": "brightness", "property": "brightness", "access": 7,
                 "value_min": 0, "value_max": 254},
                {"type": "composite", "name": "color_xy", "property": "color", "access": 7,
                 "features": [
                    {"type": "numeric", "name": "x", "property": "x", "access": 7},
                    {"type": "numeric", "name": "y", "property": "y", "access": 7}
                 ]},
                {"type": "composite", "name": "color_hs", "property": "color", "access": 7,
                 "features": [
                    {"type": "numeric", "name": "hue", "property": "hue", "access": 7},
                    {"type": "numeric", "name": "saturation", "property": "saturation", "access": 7}
                 ]}
            ]},
            {"type": "enum", "name": "effect", "property": "effect", "access": 2,
             "values": ["blink", "breathe", "okay"]},
            {"type": "numeric", "name": "linkquality", "property": "linkquality", "access": 1,
             "unit": "lqi", "value_min": 0, "value_max": 255}
        ])
    }

    fn inner_error(err: ParseError) -> ParseError {
        match err {
            ParseError::InvalidDevice { source, .. } => *source,
            other => other,
        }
    }

    #[test]
    fn parses_light_with_flattened_features() {
        let descriptor = DeviceDescriptor::parse(&device(light_exposes())).unwrap();

        assert_eq!(descriptor.id().as_str(), "0x00158d0001");
        assert_eq!(descriptor.friendly_name(), "living_room_lamp");
        assert_eq!(descriptor.vendor(), Some("IKEA"));
        assert_eq!(descriptor.model(), Some("LED1545G12"));

        let names: Vec<&str> = descriptor.capabilities().iter().map(Capability::name).collect();
        assert_eq!(names, ["state", "brightness", "color", "effect", "linkquality"]);

        let color = descriptor.capability("color").unwrap();
        assert!(color.feature("x").is_some());
        assert!(color.feature("hue").is_some());

        let linkquality = descriptor.capability("linkquality").unwrap();
        assert_eq!(linkquality.unit(), Some("lqi"));
        assert!(!linkquality.is_writable());
    }

    #[test]
    fn fingerprint_tracks_exposes() {
        let a = DeviceDescriptor::parse(&device(light_exposes())).unwrap();
        let b = DeviceDescriptor::parse(&device(light_exposes())).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.same_generation(&b));

        let c = DeviceDescriptor::parse(&device(json!([
            {"type": "numeric", "property": "temperature", "access": 1}
        ])))
        .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "hologram", "property": "beam"}
        ])))
        .unwrap_err();
        assert!(matches!(
            inner_error(err),
            ParseError::UnknownKind { ref kind, .. } if kind == "hologram"
        ));
    }

    #[test]
    fn rejects_inverted_range() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "numeric", "property": "brightness", "value_min": 10, "value_max": 1}
        ])))
        .unwrap_err();
        assert!(matches!(inner_error(err), ParseError::InvalidRange { .. }));
    }

    #[test]
    fn rejects_empty_enum() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "enum", "property": "effect", "values": []}
        ])))
        .unwrap_err();
        assert!(matches!(inner_error(err), ParseError::EmptyEnum(ref name) if name == "effect"));
    }

    #[test]
    fn rejects_binary_without_wire_values() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "binary", "property": "state", "value_on": "ON"}
        ])))
        .unwrap_err();
        assert!(matches!(inner_error(err), ParseError::MissingField(_)));
    }

    #[test]
    fn rejects_missing_property() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "numeric", "access": 1}
        ])))
        .unwrap_err();
        assert!(matches!(inner_error(err), ParseError::MissingField(_)));
    }

    #[test]
    fn rejects_duplicate_property() {
        let err = DeviceDescriptor::parse(&device(json!([
            {"type": "numeric", "property": "temperature"},
            {"type": "numeric", "property": "temperature"}
        ])))
        .unwrap_err();
        assert!(matches!(
            inner_error(err),
            ParseError::DuplicateCapability(ref name) if name == "temperature"
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut expose = json!({"type": "numeric", "property": "leaf"});
        for level in 0..6 {
            expose = json!({
                "type": "composite",
                "property": format!("level{level}"),
                "features": [expose]
            });
        }
        let err = DeviceDescriptor::parse(&device(json!([expose]))).unwrap_err();
        assert!(matches!(
            inner_error(err),
            ParseError::TooDeep { limit: MAX_NESTING_DEPTH, .. }
        ));
    }

    #[test]
    fn accepts_nesting_at_the_bound() {
        let mut expose = json!({"type": "numeric", "property": "leaf"});
        for level in 0..MAX_NESTING_DEPTH {
            expose = json!({
                "type": "composite",
                "property": format!("level{level}"),
                "features": [expose]
            });
        }
        assert!(DeviceDescriptor::parse(&device(json!([expose]))).is_ok());
    }

    #[test]
    fn parses_list_with_anonymous_item() {
        let descriptor = DeviceDescriptor::parse(&device(json!([
            {"type": "list", "property": "schedule", "access": 3, "length_max": 6,
             "item_type": {"type": "numeric", "value_min": 0, "value_max": 30}}
        ])))
        .unwrap();
        let schedule = descriptor.capability("schedule").unwrap();
        assert!(matches!(
            schedule.kind(),
            CapabilityKind::List { length_max: Some(6), .. }
        ));
    }

    #[test]
    fn error_carries_device_address() {
        let err = DeviceDescriptor::parse(&device(json!([{"type": "bogus", "property": "p"}])))
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidDevice { ref device, .. } if device == "0x00158d0001"));
    }

    #[test]
    fn device_list_isolates_bad_entries() {
        let payload = json!([
            {"ieee_address": "0x00", "friendly_name": "Coordinator", "type": "Coordinator"},
            device(light_exposes()),
            {"ieee_address": "0x02", "friendly_name": "broken", "definition": {
                "exposes": [{"type": "enum", "property": "mode", "values": []}]
            }},
            {"ieee_address": "0x03", "friendly_name": "interviewing", "definition": null}
        ]);
        let results = parse_device_list(payload.to_string().as_bytes()).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ParseError::InvalidDevice { ref device, .. }) if device == "0x02"
        ));
    }

    #[test]
    fn device_list_must_be_an_array() {
        assert!(matches!(
            parse_device_list(br#"{"devices": []}"#),
            Err(ParseError::Json(_))
        ));
        assert!(parse_device_list(b"not json").is_err());
    }

    #[test]
    fn programmatic_descriptor_rejects_duplicates() {
        let err = DeviceDescriptor::new(
            "0x01",
            "plug",
            vec![
                Capability::binary("state", Access::ALL),
                Capability::binary("state", Access::ALL),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::DuplicateCapability(_)));
    }
}
