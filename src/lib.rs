// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An MQTT v5 RPC and telemetry runtime: command invoker/executor, telemetry sender/receiver,
//! a hybrid logical clock, and the topic pattern engine that ties them together.

#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod application;
pub mod chunking;
pub mod common;
pub mod rpc;
pub mod rpc_command;
pub mod telemetry;

#[macro_use]
extern crate derive_builder;

use std::fmt::{self, Display, Formatter};

/// Major/minor version spoken by an invoker or executor, negotiated via the `__protVer` /
/// `__supProtMajVer` / `__requestProtVer` reserved user properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Major version. Executors reject requests whose major version they do not support.
    pub major: u16,
    /// Minor version. Not used to gate compatibility; informational only.
    pub minor: u16,
}

impl ProtocolVersion {
    /// Parses a `"major.minor"` string as produced by [`ProtocolVersion::to_string`].
    #[must_use]
    pub fn parse_protocol_version(s: &str) -> Option<Self> {
        let (major, minor) = s.split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// Whether this version's major component is one of `supported_majors`.
    #[must_use]
    pub fn is_supported(&self, supported_majors: &[u16]) -> bool {
        supported_majors.contains(&self.major)
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Include the README doc on a struct when running doctests to validate that the code in the
/// README can compile to verify that it has not rotted.
#[doc = include_str!("../README.md")]
#[cfg(doctest)]
struct ReadmeDoctests;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let v = ProtocolVersion { major: 1, minor: 0 };
        assert_eq!(ProtocolVersion::parse_protocol_version(&v.to_string()), Some(v));
    }

    #[test]
    fn rejects_malformed_version_string() {
        assert_eq!(ProtocolVersion::parse_protocol_version("not-a-version"), None);
        assert_eq!(ProtocolVersion::parse_protocol_version("1"), None);
    }

    #[test]
    fn is_supported_checks_major_only() {
        let v = ProtocolVersion { major: 1, minor: 7 };
        assert!(v.is_supported(&[1, 2]));
        assert!(!v.is_supported(&[2, 3]));
    }
}
