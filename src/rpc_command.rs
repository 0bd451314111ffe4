// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command execution: the server side of request/response RPC over MQTT.

use crate::ProtocolVersion;

/// Major protocol version this crate's executor speaks.
pub(crate) const RPC_COMMAND_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// Default protocol version attached to a request when the invoker omits `__protVer`.
pub(crate) const DEFAULT_RPC_COMMAND_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// Major protocol versions this executor accepts on an inbound request.
pub(crate) const SUPPORTED_RPC_COMMAND_PROTOCOL_VERSIONS: &[u16] = &[1];

/// Default number of seconds a completed response is retained in the executor's cache after a
/// request's own expiry, so that a redelivered duplicate can still be answered.
pub(crate) const CACHE_EXPIRY_BUFFER_SECONDS: u64 = 60;

/// Default bound on the executor's response cache, see [`cache::Cache`].
pub(crate) const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// The idempotent-response cache backing [`executor::CommandExecutor`].
pub(crate) mod cache;

/// The command executor implementation.
pub mod executor;

/// Re-export the command executor types for ease of use.
pub use executor::{
    CommandExecutor, CommandExecutorOptions, CommandExecutorOptionsBuilder, Request, Response, ResponseBuilder,
};
pub use crate::rpc::StatusCode;
