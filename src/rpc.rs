// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command invocation: the client side of request/response RPC over MQTT.

/// This module contains the command invoker implementation.
pub mod command_invoker;

/// This module contains the `__stat` status code taxonomy.
pub mod status_code;

/// Re-export the command invoker types for ease of use.
pub use command_invoker::{CommandInvoker, CommandInvokerOptions, CommandInvokerOptionsBuilder, CommandRequest, CommandRequestBuilder, CommandResponse};
pub use status_code::StatusCode;
