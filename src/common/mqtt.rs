// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MQTT-client contract the core consumes, modeled on the real client's own trait shapes
//! but kept self-contained: this crate never binds to a specific broker client library.

use std::error::Error;
use std::fmt;

/// MQTT v5 Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce,
    /// At least once delivery, the level used by every request, response, and telemetry
    /// message this crate publishes.
    AtLeastOnce,
    /// Exactly once delivery.
    ExactlyOnce,
}

/// MQTT v5 PUBLISH properties relevant to this crate.
#[derive(Debug, Clone, Default)]
pub struct PublishProperties {
    /// `0` for unspecified bytes, `1` for UTF-8 encoded character data.
    pub payload_format_indicator: Option<u8>,
    /// Seconds after which the broker may discard the message.
    pub message_expiry_interval: Option<u32>,
    /// Topic the recipient should publish its response to.
    pub response_topic: Option<String>,
    /// Opaque correlation identifier echoed back on a response.
    pub correlation_data: Option<bytes::Bytes>,
    /// MIME type describing the payload.
    pub content_type: Option<String>,
    /// Ordered list of free-form name/value pairs, including this crate's reserved `__`
    /// properties and any application-supplied custom data.
    pub user_properties: Vec<(String, String)>,
}

/// An inbound or outbound MQTT v5 PUBLISH packet.
#[derive(Debug, Clone)]
pub struct Publish {
    /// Topic the message was, or will be, published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: bytes::Bytes,
    /// Quality of service the message was delivered with.
    pub qos: QoS,
    /// Whether the broker should retain this message for future subscribers.
    pub retain: bool,
    /// PUBLISH properties.
    pub properties: PublishProperties,
}

/// Opaque error returned by the MQTT client contract.
#[derive(Debug)]
pub struct ClientError(pub String);

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ClientError {}

/// Publish and subscribe operations available on a client handle.
#[async_trait::async_trait]
pub trait MqttPubSub: Send + Sync {
    /// Publishes a message, returning once the broker has acknowledged it (QoS 1/2) or
    /// immediately (QoS 0).
    async fn publish(&self, message: Publish) -> Result<(), ClientError>;

    /// Subscribes to a topic filter at the given QoS, returning once the broker has
    /// acknowledged the subscription.
    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), ClientError>;

    /// Unsubscribes from a topic filter, returning once the broker has acknowledged it.
    async fn unsubscribe(&self, topic_filter: &str) -> Result<(), ClientError>;
}

/// A handle used to acknowledge a single received message once processing of it has finished.
#[async_trait::async_trait]
pub trait MqttAck: Send + Sync {
    /// Acknowledges the message, permitting the broker to consider it delivered.
    async fn ack(self: Box<Self>) -> Result<(), ClientError>;
}

/// A per-subscription stream of incoming messages.
#[async_trait::async_trait]
pub trait PubReceiver: Send {
    /// Waits for the next message, pairing it with an ack handle when the subscription is
    /// QoS 1/2. Returns `None` once the receiver has been closed and drained.
    async fn recv_manual_ack(&mut self) -> Option<(Publish, Option<Box<dyn MqttAck>>)>;

    /// Closes the receiver; outstanding messages already buffered may still be drained by
    /// further calls to [`PubReceiver::recv_manual_ack`], but no new messages will arrive.
    fn close(&mut self);
}

/// A client handle shared across every invoker/executor/sender/receiver attached to one MQTT
/// session. Associates the pub/sub surface with a per-subscription receiver type and the
/// client's own identity.
pub trait ManagedClient: MqttPubSub + Clone {
    /// Concrete receiver type produced by [`ManagedClient::create_filtered_pub_receiver`].
    type PubReceiver: PubReceiver;

    /// The MQTT client ID of the underlying connection.
    fn client_id(&self) -> &str;

    /// Creates a receiver that only observes messages matching `topic_filter`, sharing the
    /// client's single underlying subscription when multiple receivers request overlapping
    /// filters.
    fn create_filtered_pub_receiver(&self, topic_filter: &str) -> Self::PubReceiver;
}

/// An in-memory MQTT broker double used by this crate's own tests in place of a dependency
/// on a real broker client. Not part of the public API surface consumed by application code.
#[cfg(any(test, feature = "test-utils"))]
pub mod local {
    use super::{ClientError, ManagedClient, MqttAck, MqttPubSub, Publish, PubReceiver, QoS};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{broadcast, Mutex};

    struct BrokerState {
        subscriptions: HashMap<String, broadcast::Sender<Publish>>,
        retained: HashMap<String, Publish>,
    }

    /// Shared in-process broker. Topic filters support the single-level `+` wildcard only,
    /// matching the subset this crate's topic pattern engine ever generates.
    #[derive(Clone)]
    pub struct LocalBroker {
        state: Arc<Mutex<BrokerState>>,
    }

    impl Default for LocalBroker {
        fn default() -> Self {
            Self {
                state: Arc::new(Mutex::new(BrokerState {
                    subscriptions: HashMap::new(),
                    retained: HashMap::new(),
                })),
            }
        }
    }

    impl LocalBroker {
        /// Creates an empty broker.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a client handle bound to this broker with the given MQTT client ID.
        #[must_use]
        pub fn client(&self, client_id: impl Into<String>) -> LocalClient {
            LocalClient {
                client_id: client_id.into(),
                broker: self.clone(),
            }
        }
    }

    fn topic_matches(filter: &str, topic: &str) -> bool {
        let filter_segs: Vec<&str> = filter.split('/').collect();
        let topic_segs: Vec<&str> = topic.split('/').collect();
        if filter_segs.len() != topic_segs.len() {
            return false;
        }
        filter_segs
            .iter()
            .zip(topic_segs.iter())
            .all(|(f, t)| *f == "+" || f == t)
    }

    /// A client handle into a [`LocalBroker`].
    #[derive(Clone)]
    pub struct LocalClient {
        client_id: String,
        broker: LocalBroker,
    }

    #[async_trait::async_trait]
    impl MqttPubSub for LocalClient {
        async fn publish(&self, message: Publish) -> Result<(), ClientError> {
            let mut state = self.broker.state.lock().await;
            if message.retain {
                state.retained.insert(message.topic.clone(), message.clone());
            }
            for (filter, tx) in &state.subscriptions {
                if topic_matches(filter, &message.topic) {
                    let _ = tx.send(message.clone());
                }
            }
            Ok(())
        }

        async fn subscribe(&self, topic_filter: &str, _qos: QoS) -> Result<(), ClientError> {
            let mut state = self.broker.state.lock().await;
            state
                .subscriptions
                .entry(topic_filter.to_string())
                .or_insert_with(|| broadcast::channel(256).0);
            Ok(())
        }

        async fn unsubscribe(&self, topic_filter: &str) -> Result<(), ClientError> {
            let mut state = self.broker.state.lock().await;
            state.subscriptions.remove(topic_filter);
            Ok(())
        }
    }

    impl ManagedClient for LocalClient {
        type PubReceiver = LocalReceiver;

        fn client_id(&self) -> &str {
            &self.client_id
        }

        fn create_filtered_pub_receiver(&self, topic_filter: &str) -> Self::PubReceiver {
            LocalReceiver {
                filter: topic_filter.to_string(),
                broker: self.broker.clone(),
                rx: None,
                closed: false,
            }
        }
    }

    /// A no-op ack handle: the local broker does not model unacknowledged redelivery.
    pub struct LocalAck;

    #[async_trait::async_trait]
    impl MqttAck for LocalAck {
        async fn ack(self: Box<Self>) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// Receiver half bound to a single topic filter against a [`LocalBroker`].
    pub struct LocalReceiver {
        filter: String,
        broker: LocalBroker,
        rx: Option<broadcast::Receiver<Publish>>,
        closed: bool,
    }

    #[async_trait::async_trait]
    impl PubReceiver for LocalReceiver {
        async fn recv_manual_ack(&mut self) -> Option<(Publish, Option<Box<dyn MqttAck>>)> {
            if self.closed {
                return None;
            }
            if self.rx.is_none() {
                let mut state = self.broker.state.lock().await;
                let tx = state
                    .subscriptions
                    .entry(self.filter.clone())
                    .or_insert_with(|| broadcast::channel(256).0);
                self.rx = Some(tx.subscribe());
            }
            loop {
                match self.rx.as_mut().unwrap().recv().await {
                    Ok(publish) => return Some((publish, Some(Box::new(LocalAck)))),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }
}
