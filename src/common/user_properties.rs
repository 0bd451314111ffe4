// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reserved MQTT user-property names used on the wire by this crate.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Reserved prefix for every user property this crate puts on the wire; custom properties
/// supplied by application code must not start with this prefix.
pub const RESERVED_PREFIX: &str = "__";

/// Enum representing the reserved system user properties.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UserProperty {
    /// A [`HybridLogicalClock`](super::hybrid_logical_clock::HybridLogicalClock) timestamp
    /// associated with the request, response, or telemetry message.
    Timestamp,
    /// HTTP-style status code of a command response (see [`crate::rpc::status_code::StatusCode`]).
    Status,
    /// Human-readable status message; present when [`UserProperty::Status`] != 200 (OK).
    StatusMessage,
    /// `"true"`/`"false"` flag indicating whether a non-200 status was raised by the
    /// application handler rather than the runtime.
    IsApplicationError,
    /// Client ID of the command invoker or telemetry sender that produced a message.
    SourceId,
    /// Correlation-bound identifier of the invoker, carried on requests so an executor can
    /// target its response even across multiple concurrent invokers.
    CommandInvokerId,
    /// Carries a [`HybridLogicalClock`](super::hybrid_logical_clock::HybridLogicalClock)
    /// fencing token used to order competing writes at the executor.
    FencingToken,
    /// Name of an MQTT header in a request that is missing or has an invalid value.
    InvalidPropertyName,
    /// Value of an MQTT header in a request that is invalid.
    InvalidPropertyValue,
    /// Protocol version spoken by the sender of a request or message.
    ProtocolVersion,
    /// Space-separated list of major protocol versions ("1 2 3") supported by a command
    /// executor; set only on a `RequestVersionNotSupported` response.
    SupportedMajorVersions,
    /// Protocol version carried on a rejected request; set only on a
    /// `RequestVersionNotSupported` response.
    RequestProtocolVersion,
    /// JSON-encoded chunk descriptor for the optional chunking sub-protocol (`§6`).
    ChunkInfo,
}

impl Display for UserProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UserProperty::Timestamp => write!(f, "__ts"),
            UserProperty::Status => write!(f, "__stat"),
            UserProperty::StatusMessage => write!(f, "__stMsg"),
            UserProperty::IsApplicationError => write!(f, "__apErr"),
            UserProperty::SourceId => write!(f, "__srcId"),
            UserProperty::CommandInvokerId => write!(f, "__invId"),
            UserProperty::FencingToken => write!(f, "__fencingToken"),
            UserProperty::InvalidPropertyName => write!(f, "__propName"),
            UserProperty::InvalidPropertyValue => write!(f, "__propVal"),
            UserProperty::ProtocolVersion => write!(f, "__protVer"),
            UserProperty::SupportedMajorVersions => write!(f, "__supProtMajVer"),
            UserProperty::RequestProtocolVersion => write!(f, "__requestProtVer"),
            UserProperty::ChunkInfo => write!(f, "__chunk"),
        }
    }
}

impl FromStr for UserProperty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "__ts" => Ok(UserProperty::Timestamp),
            "__stat" => Ok(UserProperty::Status),
            "__stMsg" => Ok(UserProperty::StatusMessage),
            "__apErr" => Ok(UserProperty::IsApplicationError),
            "__srcId" => Ok(UserProperty::SourceId),
            "__invId" => Ok(UserProperty::CommandInvokerId),
            "__fencingToken" => Ok(UserProperty::FencingToken),
            "__propName" => Ok(UserProperty::InvalidPropertyName),
            "__propVal" => Ok(UserProperty::InvalidPropertyValue),
            "__protVer" => Ok(UserProperty::ProtocolVersion),
            "__supProtMajVer" => Ok(UserProperty::SupportedMajorVersions),
            "__requestProtVer" => Ok(UserProperty::RequestProtocolVersion),
            "__chunk" => Ok(UserProperty::ChunkInfo),
            _ => Err(()),
        }
    }
}

pub(crate) fn is_invalid_utf8(s: &str) -> bool {
    // Round-tripping through bytes is always valid for a Rust `&str`; this guards against
    // control characters that are technically valid UTF-8 but never legal in an MQTT UTF-8
    // string per the MQTT v5 spec (null and the U+0001..U+001F/U+007F..U+009F ranges).
    s.chars().any(|c| c == '\u{0000}' || ('\u{0001}'..='\u{001F}').contains(&c))
}

/// Validates a slice of custom user properties supplied by application code.
///
/// # Errors
/// Returns a description of the problem if any key collides with [`RESERVED_PREFIX`] or if any
/// key/value contains characters that are not legal in an MQTT UTF-8 string.
pub fn validate_user_properties(property_list: &[(String, String)]) -> Result<(), String> {
    for (key, value) in property_list {
        if key.starts_with(RESERVED_PREFIX) {
            return Err(format!(
                "Custom user property key '{key}' collides with the reserved '{RESERVED_PREFIX}' prefix"
            ));
        }
        if is_invalid_utf8(key) || is_invalid_utf8(value) {
            return Err(format!(
                "Invalid user data key '{key}' or value '{value}' isn't a valid MQTT UTF-8 string"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(UserProperty::Timestamp; "timestamp")]
    #[test_case(UserProperty::Status; "status")]
    #[test_case(UserProperty::StatusMessage; "status_message")]
    #[test_case(UserProperty::IsApplicationError; "is_application_error")]
    #[test_case(UserProperty::SourceId; "source_id")]
    #[test_case(UserProperty::CommandInvokerId; "command_invoker_id")]
    #[test_case(UserProperty::FencingToken; "fencing_token")]
    #[test_case(UserProperty::InvalidPropertyName; "invalid_property_name")]
    #[test_case(UserProperty::InvalidPropertyValue; "invalid_property_value")]
    #[test_case(UserProperty::ProtocolVersion; "protocol_version")]
    #[test_case(UserProperty::SupportedMajorVersions; "supported_major_versions")]
    #[test_case(UserProperty::RequestProtocolVersion; "request_protocol_version")]
    #[test_case(UserProperty::ChunkInfo; "chunk_info")]
    fn test_to_from_string(prop: UserProperty) {
        assert_eq!(prop, UserProperty::from_str(&prop.to_string()).unwrap());
    }

    #[test_case(&[("abc\u{0001}def".to_string(), "abcdef".to_string())]; "malformed_key")]
    #[test_case(&[("abcdef".to_string(), "abc\u{0000}def".to_string())]; "malformed_value")]
    fn test_validate_user_properties_invalid_value(custom_user_data: &[(String, String)]) {
        assert!(validate_user_properties(custom_user_data).is_err());
    }

    #[test]
    fn test_validate_user_properties_rejects_reserved_prefix() {
        let data = [("__mine".to_string(), "abcdef".to_string())];
        assert!(validate_user_properties(&data).is_err());
    }

    #[test]
    fn test_validate_user_properties_valid_value() {
        let data = [("abcdef".to_string(), "abcdef".to_string())];
        assert!(validate_user_properties(&data).is_ok());
    }
}
