// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The error taxonomy shared by every component of the protocol runtime.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Represents the kind of error that occurs in the protocol runtime.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AIOProtocolErrorKind {
    /// A required MQTT header property is missing or has an invalid value on a received message,
    /// or a malformed Hybrid Logical Clock string was encountered.
    HeaderInvalid,
    /// MQTT payload cannot be serialized or deserialized.
    PayloadInvalid,
    /// An operation was aborted due to timeout.
    Timeout,
    /// An operation was cancelled.
    Cancelled,
    /// A topic pattern, option value, or other configuration is invalid.
    ConfigurationInvalid,
    /// The current program state is invalid vis-a-vis the operation that was called (e.g.
    /// clock drift exceeded, clock not initialized).
    StateInvalid,
    /// The client or service observed a condition that was thought to be impossible
    /// (counter overflow, cache corruption).
    InternalLogicError,
    /// The command executor's handler raised an application-level error. Becomes remote
    /// (`is_remote = true`) when observed by the invoker.
    ExecutionException,
    /// The underlying MQTT transport failed a publish, subscribe, or unsubscribe.
    MqttError,
}

/// Represents the possible types of the value of a property reported on an [`AIOProtocolError`].
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    /// A 32-bit integer value.
    Integer(i32),
    /// A 64-bit floating point value.
    Float(f64),
    /// A String value.
    String(String),
    /// A bool value.
    Boolean(bool),
}

/// Represents an error that occurred in the protocol runtime.
///
/// Every fallible public operation in this crate returns `Result<T, AIOProtocolError>`.
#[derive(Debug)]
pub struct AIOProtocolError {
    /// The error message.
    pub message: Option<String>,
    /// The specific kind of error that occurred.
    pub kind: AIOProtocolErrorKind,
    /// True if the error occurred in user-supplied code (a command or telemetry handler)
    /// rather than the runtime itself.
    pub in_application: bool,
    /// True if the error was identified immediately after the API was called, prior to any
    /// attempted network communication.
    pub is_shallow: bool,
    /// True if the error was detected by, or reports the state of, a remote component.
    pub is_remote: bool,
    /// Error from a dependent component that caused this error.
    pub nested_error: Option<Box<dyn Error + Send + Sync>>,
    /// An HTTP-style status code (see `rpc::status_code::StatusCode`) that caused the error.
    pub http_status_code: Option<u16>,
    /// The name of an MQTT header that is missing or has an invalid value.
    pub header_name: Option<String>,
    /// The value of an MQTT header that is invalid.
    pub header_value: Option<String>,
    /// The name of a timeout condition that elapsed.
    pub timeout_name: Option<String>,
    /// The duration of a timeout condition that elapsed.
    pub timeout_value: Option<Duration>,
    /// The name of an option, field, or argument that is missing or has an invalid value.
    pub property_name: Option<String>,
    /// The value of an option, field, or argument that is invalid.
    pub property_value: Option<Value>,
    /// The name of a command relevant to the error being reported.
    pub command_name: Option<String>,
}

impl fmt::Display for AIOProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "{message}")
        } else {
            match self.kind {
                AIOProtocolErrorKind::HeaderInvalid => write!(
                    f,
                    "The MQTT header '{}' has an invalid value: '{}'",
                    self.header_name.as_deref().unwrap_or("Not Specified"),
                    self.header_value.as_deref().unwrap_or("Not Specified")
                ),
                AIOProtocolErrorKind::PayloadInvalid => {
                    write!(f, "Serialization or deserialization of the MQTT payload failed")
                }
                AIOProtocolErrorKind::Timeout => write!(
                    f,
                    "The timeout '{}' elapsed after {} ms",
                    self.timeout_name.as_deref().unwrap_or("Not Specified"),
                    self.timeout_value
                        .map_or_else(|| "Not Specified".to_string(), |d| d.as_millis().to_string())
                ),
                AIOProtocolErrorKind::Cancelled => write!(f, "The operation was cancelled"),
                AIOProtocolErrorKind::ConfigurationInvalid => {
                    if let Some(property_value) = &self.property_value {
                        write!(
                            f,
                            "The property '{}' has an invalid value: {:?}",
                            self.property_name.as_deref().unwrap_or("Not Specified"),
                            property_value
                        )
                    } else {
                        write!(
                            f,
                            "The property '{}' has an invalid value: 'Not Specified'",
                            self.property_name.as_deref().unwrap_or("Not Specified")
                        )
                    }
                }
                AIOProtocolErrorKind::StateInvalid => write!(
                    f,
                    "Invalid state in property '{}'",
                    self.property_name.as_deref().unwrap_or("Not Specified")
                ),
                AIOProtocolErrorKind::InternalLogicError => write!(
                    f,
                    "Internal logic error in property '{}'",
                    self.property_name.as_deref().unwrap_or("Not Specified")
                ),
                AIOProtocolErrorKind::ExecutionException => write!(
                    f,
                    "The command handler encountered an error while executing the command"
                ),
                AIOProtocolErrorKind::MqttError => write!(f, "An MQTT communication error occurred"),
            }
        }
    }
}

impl Error for AIOProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.nested_error
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl AIOProtocolError {
    /// Creates a new [`AIOProtocolError`] for an invalid MQTT header value.
    #[must_use]
    pub fn new_header_invalid_error(
        header_name: &str,
        header_value: &str,
        is_remote: bool,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::HeaderInvalid,
            in_application: false,
            is_shallow: false,
            is_remote,
            nested_error: None,
            http_status_code: None,
            header_name: Some(header_name.to_string()),
            header_value: Some(header_value.to_string()),
            timeout_name: None,
            timeout_value: None,
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for an invalid or undecodable MQTT payload.
    #[must_use]
    pub fn new_payload_invalid_error(
        is_remote: bool,
        nested_error: Option<Box<dyn Error + Send + Sync>>,
        http_status_code: Option<u16>,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::PayloadInvalid,
            in_application: false,
            is_shallow: false,
            is_remote,
            nested_error,
            http_status_code,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for a timeout.
    #[must_use]
    pub fn new_timeout_error(
        timeout_name: &str,
        timeout_value: Duration,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::Timeout,
            in_application: false,
            is_shallow: false,
            is_remote: false,
            nested_error: None,
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: Some(timeout_name.to_string()),
            timeout_value: Some(timeout_value),
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for a cancelled operation.
    #[must_use]
    pub fn new_cancelled_error(message: Option<String>, command_name: Option<String>) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::Cancelled,
            in_application: false,
            is_shallow: false,
            is_remote: false,
            nested_error: None,
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for an invalid configuration value
    /// (bad topic pattern, missing token, illegal option value).
    #[must_use]
    pub fn new_configuration_invalid_error(
        nested_error: Option<Box<dyn Error + Send + Sync>>,
        property_name: &str,
        property_value: Value,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::ConfigurationInvalid,
            in_application: false,
            is_shallow: true,
            is_remote: false,
            nested_error,
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: Some(property_name.to_string()),
            property_value: Some(property_value),
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for an invalid state (HLC drift exceeded, clock not
    /// initialized).
    #[must_use]
    pub fn new_state_invalid_error(
        property_name: &str,
        property_value: Option<Value>,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::StateInvalid,
            in_application: false,
            is_shallow: true,
            is_remote: false,
            nested_error: None,
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: Some(property_name.to_string()),
            property_value,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for an internal invariant violation.
    #[must_use]
    pub fn new_internal_logic_error(
        property_name: &str,
        property_value: Option<Value>,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::InternalLogicError,
            in_application: false,
            is_shallow: false,
            is_remote: false,
            nested_error: None,
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: Some(property_name.to_string()),
            property_value,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for a command handler's application-level error.
    /// `is_remote` is true when observed on the invoker side of the wire.
    #[must_use]
    pub fn new_execution_exception_error(
        http_status_code: u16,
        is_remote: bool,
        message: Option<String>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::ExecutionException,
            in_application: true,
            is_shallow: false,
            is_remote,
            nested_error: None,
            http_status_code: Some(http_status_code),
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`AIOProtocolError`] for an MQTT transport failure.
    #[must_use]
    pub fn new_mqtt_error(
        message: Option<String>,
        nested_error: Box<dyn Error + Send + Sync>,
        command_name: Option<String>,
    ) -> AIOProtocolError {
        let mut e = AIOProtocolError {
            message,
            kind: AIOProtocolErrorKind::MqttError,
            in_application: false,
            is_shallow: false,
            is_remote: false,
            nested_error: Some(nested_error),
            http_status_code: None,
            header_name: None,
            header_value: None,
            timeout_name: None,
            timeout_value: None,
            property_name: None,
            property_value: None,
            command_name,
        };
        e.ensure_error_message();
        e
    }

    /// Sets the error's message to a default value if a custom message is not already set.
    pub fn ensure_error_message(&mut self) {
        if self.message.is_none() {
            self.message = Some(self.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_invalid_is_shallow_and_local() {
        let e = AIOProtocolError::new_configuration_invalid_error(
            None,
            "request_topic_pattern",
            Value::String(String::new()),
            None,
            None,
        );
        assert!(e.is_shallow);
        assert!(!e.is_remote);
        assert!(!e.in_application);
        assert_eq!(e.kind, AIOProtocolErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn execution_exception_marks_in_application() {
        let e = AIOProtocolError::new_execution_exception_error(500, true, None, Some("increment".into()));
        assert!(e.in_application);
        assert!(e.is_remote);
        assert_eq!(e.http_status_code, Some(500));
    }

    #[test]
    fn default_message_is_derived_from_kind() {
        let e = AIOProtocolError::new_cancelled_error(None, None);
        assert_eq!(e.message.as_deref(), Some("The operation was cancelled"));
    }

    #[test]
    fn custom_message_is_preserved() {
        let e = AIOProtocolError::new_mqtt_error(
            Some("publish rejected".to_string()),
            Box::new(std::io::Error::other("broker closed")),
            None,
        );
        assert_eq!(e.message.as_deref(), Some("publish rejected"));
        assert!(e.source().is_some());
    }
}
