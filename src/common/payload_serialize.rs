// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Application payload (de)serialization contract shared by every invoker, executor, sender,
//! and receiver.

use std::error::Error;
use std::fmt::Debug;

/// Format indicator for serialization and deserialization.
#[repr(u8)]
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FormatIndicator {
    /// Unspecified bytes.
    UnspecifiedBytes = 0,
    /// UTF-8 encoded character data (e.g. JSON).
    Utf8EncodedCharacterData = 1,
}

/// Trait for serializing and deserializing command/telemetry payloads.
///
/// # Examples
/// ```
/// use mqtt5_rpc_protocol::common::payload_serialize::{PayloadSerialize, FormatIndicator};
///
/// #[derive(Clone, Debug)]
/// pub struct CarLocationResponse {
///     latitude: f64,
///     longitude: f64,
/// }
///
/// impl PayloadSerialize for CarLocationResponse {
///     type SerializerError = String;
///
///     fn content_type() -> &'static str {
///         "application/json"
///     }
///     fn format_indicator() -> FormatIndicator {
///         FormatIndicator::Utf8EncodedCharacterData
///     }
///     fn serialize(&self) -> Result<Vec<u8>, Self::SerializerError> {
///         Ok(format!("{{\"latitude\": {}, \"longitude\": {}}}", self.latitude, self.longitude).into_bytes())
///     }
///     fn deserialize(payload: &[u8]) -> Result<Self, Self::SerializerError> {
///         let _payload = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
///         Ok(CarLocationResponse { latitude: 12.0, longitude: 35.0 })
///     }
/// }
/// ```
pub trait PayloadSerialize: Clone {
    /// Error returned on a failed serialization or deserialization attempt.
    type SerializerError: Debug + Into<Box<dyn Error + Sync + Send + 'static>>;

    /// The MIME type describing the serialized payload, e.g. `application/json`.
    fn content_type() -> &'static str;

    /// [`FormatIndicator::Utf8EncodedCharacterData`] for character data (e.g. JSON),
    /// [`FormatIndicator::UnspecifiedBytes`] otherwise.
    fn format_indicator() -> FormatIndicator;

    /// Serializes `self` to a byte vector.
    ///
    /// # Errors
    /// Returns [`PayloadSerialize::SerializerError`] if the serialization fails.
    fn serialize(&self) -> Result<Vec<u8>, Self::SerializerError>;

    /// Deserializes a byte slice to `Self`.
    ///
    /// # Errors
    /// Returns [`PayloadSerialize::SerializerError`] if the deserialization fails.
    fn deserialize(payload: &[u8]) -> Result<Self, Self::SerializerError>;
}

/// An empty payload, used by commands and telemetry messages that carry no application data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmptyPayload;

impl PayloadSerialize for EmptyPayload {
    type SerializerError = String;

    fn content_type() -> &'static str {
        "application/octet-stream"
    }
    fn format_indicator() -> FormatIndicator {
        FormatIndicator::UnspecifiedBytes
    }
    fn serialize(&self) -> Result<Vec<u8>, Self::SerializerError> {
        Ok(Vec::new())
    }
    fn deserialize(payload: &[u8]) -> Result<Self, Self::SerializerError> {
        if payload.is_empty() {
            Ok(EmptyPayload)
        } else {
            Err("expected an empty payload".to_string())
        }
    }
}

#[cfg(test)]
use mockall::mock;
#[cfg(test)]
mock! {
    pub Payload{}
    impl Clone for Payload {
        fn clone(&self) -> Self;
    }
    impl PayloadSerialize for Payload {
        type SerializerError = String;
        fn content_type() -> &'static str;
        fn format_indicator() -> FormatIndicator;
        fn serialize(&self) -> Result<Vec<u8>, String>;
        fn deserialize(payload: &[u8]) -> Result<Self, String>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_round_trips() {
        assert_eq!(EmptyPayload.serialize().unwrap(), Vec::<u8>::new());
        assert_eq!(EmptyPayload::deserialize(&[]).unwrap(), EmptyPayload);
    }

    #[test]
    fn empty_payload_rejects_nonempty_bytes() {
        assert!(EmptyPayload::deserialize(&[1]).is_err());
    }
}
