// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Status codes carried on a command response's `__stat` user property.

use std::str::FromStr;

use crate::common::aio_protocol_error::AIOProtocolError;

/// Status of a command response, carried as the `__stat` MQTT user property.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusCode {
    /// The command executed successfully.
    Ok = 200,
    /// The request header or payload was missing or invalid.
    BadRequest = 400,
    /// No executor is registered to handle the command.
    NotFound = 404,
    /// The request named a protocol major version the executor does not support.
    RequestVersionNotSupported = 405,
    /// The executor could not produce a response before the request's expiry.
    Timeout = 408,
    /// The request's content type is not supported by this implementation.
    UnsupportedMediaType = 415,
    /// The request was well-formed but the application handler rejected it.
    UnprocessableContent = 422,
    /// An error occurred in the executor's runtime unrelated to the application handler.
    InternalError = 500,
    /// The executor is in a state that prevents it from processing the command.
    ServiceUnavailable = 503,
}

impl FromStr for StatusCode {
    type Err = AIOProtocolError;

    fn from_str(s: &str) -> Result<Self, AIOProtocolError> {
        let status: u16 = s.parse().map_err(|e| {
            AIOProtocolError::new_header_invalid_error(
                "__stat",
                s,
                false,
                Some(format!("Could not parse status '{s}' as an integer: {e}")),
                None,
            )
        })?;

        match status {
            x if x == StatusCode::Ok as u16 => Ok(StatusCode::Ok),
            x if x == StatusCode::BadRequest as u16 => Ok(StatusCode::BadRequest),
            x if x == StatusCode::NotFound as u16 => Ok(StatusCode::NotFound),
            x if x == StatusCode::RequestVersionNotSupported as u16 => {
                Ok(StatusCode::RequestVersionNotSupported)
            }
            x if x == StatusCode::Timeout as u16 => Ok(StatusCode::Timeout),
            x if x == StatusCode::UnsupportedMediaType as u16 => Ok(StatusCode::UnsupportedMediaType),
            x if x == StatusCode::UnprocessableContent as u16 => Ok(StatusCode::UnprocessableContent),
            x if x == StatusCode::InternalError as u16 => Ok(StatusCode::InternalError),
            x if x == StatusCode::ServiceUnavailable as u16 => Ok(StatusCode::ServiceUnavailable),
            _ => Err(AIOProtocolError::new_header_invalid_error(
                "__stat",
                s,
                true,
                Some(format!("Unrecognized status code: {s}")),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::aio_protocol_error::AIOProtocolErrorKind;
    use test_case::test_case;

    #[test_case(StatusCode::Ok; "Ok")]
    #[test_case(StatusCode::BadRequest; "BadRequest")]
    #[test_case(StatusCode::NotFound; "NotFound")]
    #[test_case(StatusCode::RequestVersionNotSupported; "RequestVersionNotSupported")]
    #[test_case(StatusCode::Timeout; "Timeout")]
    #[test_case(StatusCode::UnsupportedMediaType; "UnsupportedMediaType")]
    #[test_case(StatusCode::UnprocessableContent; "UnprocessableContent")]
    #[test_case(StatusCode::InternalError; "InternalError")]
    #[test_case(StatusCode::ServiceUnavailable; "ServiceUnavailable")]
    fn round_trips_through_string(status_code: StatusCode) {
        assert_eq!(status_code, StatusCode::from_str(&(status_code as u16).to_string()).unwrap());
    }

    #[test]
    fn non_numeric_status_is_header_invalid() {
        let err = StatusCode::from_str("not a number").unwrap_err();
        assert_eq!(err.kind, AIOProtocolErrorKind::HeaderInvalid);
        assert!(!err.is_remote);
    }

    #[test]
    fn unrecognized_numeric_status_is_header_invalid_and_remote() {
        let err = StatusCode::from_str("201").unwrap_err();
        assert_eq!(err.kind, AIOProtocolErrorKind::HeaderInvalid);
        assert!(err.is_remote);
    }
}
