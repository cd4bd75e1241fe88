// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `z2m_lib` library.
//!
//! Errors caused by automation code (bad values, stale proxies) are returned
//! synchronously from the call that caused them. Errors caused by the bridge
//! or the broker are never returned into unrelated call stacks: malformed
//! payloads are logged and dropped, and exhausted writes are reported through
//! [`WriteFailure`](crate::sync::WriteFailure) events.

use thiserror::Error;

use crate::event::DeviceId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A device descriptor could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A value was rejected at the call boundary.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An incoming payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Broker communication failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The proxy refers to a descriptor that has been replaced or removed.
    #[error(transparent)]
    StaleProxy(#[from] StaleProxyError),

    /// No device with this IEEE address or friendly name is known.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The engine command queue is full; the write was not recorded.
    #[error("engine queue is full")]
    QueueFull,

    /// The synchronization engine has shut down.
    #[error("synchronization engine has stopped")]
    EngineStopped,

    /// Waiting for something took longer than allowed.
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Errors raised while ingesting bridge device descriptors.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not valid JSON or does not have the expected shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// An expose entry has a `type` this library does not know.
    #[error("capability {capability:?} has unrecognized kind {kind:?}")]
    UnknownKind {
        /// Property the entry describes (may be empty for containers).
        capability: String,
        /// The unrecognized `type` value.
        kind: String,
    },

    /// A numeric capability declares `value_min > value_max`.
    #[error("capability {capability:?} has invalid range [{min}, {max}]")]
    InvalidRange {
        /// The offending capability.
        capability: String,
        /// Declared minimum.
        min: f64,
        /// Declared maximum.
        max: f64,
    },

    /// An enumerated capability declares no values.
    #[error("capability {0:?} declares an empty value set")]
    EmptyEnum(String),

    /// Composite or list entries nest deeper than the supported bound.
    #[error("capability {capability:?} nests deeper than {limit} levels")]
    TooDeep {
        /// The capability at which the bound was exceeded.
        capability: String,
        /// The nesting bound.
        limit: usize,
    },

    /// Two capabilities of one device share a property name.
    #[error("duplicate capability {0:?}")]
    DuplicateCapability(String),

    /// One device in the device list is malformed.
    #[error("device {device}: {source}")]
    InvalidDevice {
        /// IEEE address of the device, when it could be read.
        device: String,
        /// What was wrong with it.
        #[source]
        source: Box<ParseError>,
    },
}

/// Errors raised when a value does not fit a capability.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The device exposes no capability with this name.
    #[error("unknown capability {0:?}")]
    UnknownCapability(String),

    /// The value has the wrong shape for the capability.
    #[error("capability {capability:?} expects a {expected} value, got {actual}")]
    WrongKind {
        /// The capability written to.
        capability: String,
        /// Kind the capability declares.
        expected: &'static str,
        /// Kind of the provided value.
        actual: &'static str,
    },

    /// A numeric value lies outside the declared range.
    #[error("value {actual} is out of range for {capability:?}")]
    OutOfRange {
        /// The capability written to.
        capability: String,
        /// Declared minimum, if any.
        min: Option<f64>,
        /// Declared maximum, if any.
        max: Option<f64>,
        /// The rejected value.
        actual: f64,
    },

    /// A numeric value is NaN or infinite.
    #[error("value for {0:?} is not a finite number")]
    NotFinite(String),

    /// An enumerated value is not in the allowed set.
    #[error("{value:?} is not an allowed value for {capability:?}")]
    NotAllowed {
        /// The capability written to.
        capability: String,
        /// The rejected value.
        value: String,
    },

    /// A composite value names a member the capability does not have.
    #[error("capability {capability:?} has no member {field:?}")]
    UnknownField {
        /// The composite capability.
        capability: String,
        /// The unknown member.
        field: String,
    },

    /// A list value has too few or too many items.
    #[error("capability {capability:?} does not accept {len} items")]
    InvalidLength {
        /// The list capability.
        capability: String,
        /// Number of items provided.
        len: usize,
    },

    /// The capability cannot be written.
    #[error("capability {0:?} is not writable")]
    NotWritable(String),

    /// The capability cannot be read.
    #[error("capability {0:?} is not readable")]
    NotReadable(String),

    /// The capability cannot be queried with `/get`.
    #[error("capability {0:?} cannot be queried")]
    NotQueryable(String),

    /// The binary capability declares no toggle value.
    #[error("capability {0:?} cannot be toggled")]
    NotToggleable(String),

    /// The numeric capability has no finite range to scale against.
    #[error("capability {0:?} has no bounded range")]
    Unbounded(String),

    /// A relative write needs a value that has not been reported yet.
    #[error("value of {0:?} is not known yet")]
    UnknownValue(String),
}

/// Errors raised while decoding an incoming state payload.
///
/// These are never returned to callers; the engine logs them and drops the
/// offending message or entry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The payload names a property the descriptor does not declare.
    #[error("unknown capability {0:?}")]
    UnknownCapability(String),
}

/// Returned by every operation on a proxy whose descriptor was replaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("proxy for device {device} is stale")]
pub struct StaleProxyError {
    /// The device the proxy was generated for.
    pub device: DeviceId,
}

/// Errors related to broker communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT connection or communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The broker rejected or dropped a publish.
    #[error("publish to {0} failed")]
    PublishFailed(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::OutOfRange {
            capability: "brightness".to_string(),
            min: Some(0.0),
            max: Some(254.0),
            actual: 300.0,
        };
        assert_eq!(
            err.to_string(),
            "value 300 is out of range for \"brightness\""
        );
    }

    #[test]
    fn error_from_validation_error() {
        let err: Error = ValidationError::NotWritable("linkquality".to_string()).into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NotWritable(ref name)) if name == "linkquality"
        ));
    }

    #[test]
    fn parse_error_wraps_device() {
        let err = ParseError::InvalidDevice {
            device: "0x00158d0001".to_string(),
            source: Box::new(ParseError::EmptyEnum("effect".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "device 0x00158d0001: capability \"effect\" declares an empty value set"
        );
    }

    #[test]
    fn stale_proxy_display() {
        let err = StaleProxyError {
            device: DeviceId::new("0xabc"),
        };
        assert_eq!(err.to_string(), "proxy for device 0xabc is stale");
    }
}
