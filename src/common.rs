// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared primitives consumed by every invoker, executor, sender, and receiver: the error
//! taxonomy, the hybrid logical clock, the topic pattern engine, the payload codec contract,
//! the reserved user-property vocabulary, and the MQTT client contract itself.

/// The error taxonomy shared by every component of the protocol runtime.
pub mod aio_protocol_error;

/// A Hybrid Logical Clock totally ordering events produced by multiple nodes with skewed wall
/// clocks.
pub mod hybrid_logical_clock;

/// The MQTT-client contract the core consumes, instead of a binding to a specific broker client
/// library.
pub mod mqtt;

/// The application payload (de)serialization contract.
pub mod payload_serialize;

/// Topic pattern compilation, rendering, and token extraction.
pub mod topic_processor;

/// Reserved MQTT user-property names used on the wire by this crate.
pub mod user_properties;
