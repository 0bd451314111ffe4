// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry receiver: subscribes to a telemetry topic and deserializes each inbound message,
//! optionally recovering a `CloudEvent` envelope from its custom user properties.

use std::{collections::HashMap, fmt::Display, future::Future, marker::PhantomData, str::FromStr, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::cloud_event::{CloudEvent, CloudEventBuilder, CloudEventFields};
use super::{DEFAULT_TELEMETRY_PROTOCOL_VERSION, SUPPORTED_TELEMETRY_PROTOCOL_VERSIONS};
use crate::application::{ApplicationContext, ApplicationHybridLogicalClock};
use crate::common::{
    aio_protocol_error::AIOProtocolError,
    hybrid_logical_clock::HybridLogicalClock,
    mqtt::{ManagedClient, MqttAck, Publish, PubReceiver, QoS},
    payload_serialize::{FormatIndicator, PayloadSerialize},
    topic_processor::TopicPattern,
    user_properties::UserProperty,
};
use crate::ProtocolVersion;

/// A deserialized telemetry message, handed to application code by [`Receiver::recv`].
#[derive(Debug)]
pub struct Message<T: PayloadSerialize> {
    /// Deserialized payload.
    pub payload: T,
    /// MIME type the sender attached to the payload, if any.
    pub content_type: Option<String>,
    /// Format indicator the sender attached to the payload.
    pub format_indicator: FormatIndicator,
    /// Custom MQTT user properties the sender attached, including an unparsed `CloudEvent`
    /// envelope, if the sender attached one (see [`CloudEvent::from_telemetry`]).
    pub custom_user_data: Vec<(String, String)>,
    /// MQTT client ID of the sender, if present.
    pub sender_id: Option<String>,
    /// The sender's HLC timestamp at the time the message was sent, if present.
    pub timestamp: Option<HybridLogicalClock>,
    /// Every topic token parsed out of the concrete message topic.
    pub topic_tokens: HashMap<String, String>,
    /// Topic the message was received on.
    pub topic: String,
}

impl<T: PayloadSerialize> Message<T> {
    fn try_from_publish(publish: Publish) -> Result<Self, String> {
        let expected_aio_properties =
            [UserProperty::Timestamp, UserProperty::ProtocolVersion, UserProperty::SourceId];
        let mut custom_user_data = Vec::new();
        let mut aio_data = HashMap::new();
        for (key, value) in publish.properties.user_properties {
            match UserProperty::from_str(&key) {
                Ok(p) if expected_aio_properties.contains(&p) => {
                    aio_data.insert(p, value);
                }
                Ok(_) => {
                    log::warn!("telemetry message should not contain MQTT user property '{key}'");
                    custom_user_data.push((key, value));
                }
                Err(()) => custom_user_data.push((key, value)),
            }
        }

        let protocol_version = match aio_data.get(&UserProperty::ProtocolVersion) {
            Some(v) => ProtocolVersion::parse_protocol_version(v)
                .ok_or_else(|| format!("received a telemetry message with an unparsable protocol version: {v}"))?,
            None => DEFAULT_TELEMETRY_PROTOCOL_VERSION,
        };
        if !protocol_version.is_supported(SUPPORTED_TELEMETRY_PROTOCOL_VERSIONS) {
            return Err(format!(
                "unsupported protocol version '{protocol_version}'; only major versions \
                 {SUPPORTED_TELEMETRY_PROTOCOL_VERSIONS:?} are supported"
            ));
        }

        let timestamp = aio_data
            .get(&UserProperty::Timestamp)
            .map(|s| HybridLogicalClock::from_str(s))
            .transpose()
            .map_err(|e| e.to_string())?;

        let content_type = publish.properties.content_type;
        let format_indicator = match publish.properties.payload_format_indicator {
            Some(1) => FormatIndicator::Utf8EncodedCharacterData,
            _ => FormatIndicator::UnspecifiedBytes,
        };
        let payload = T::deserialize(&publish.payload).map_err(|e| format!("{e:?}"))?;

        Ok(Message {
            payload,
            content_type,
            format_indicator,
            sender_id: aio_data.remove(&UserProperty::SourceId),
            custom_user_data,
            timestamp,
            topic_tokens: HashMap::new(),
            topic: publish.topic,
        })
    }
}

impl CloudEvent {
    /// Recovers a [`CloudEvent`] from a telemetry message's custom user properties, if the
    /// sender attached one via [`crate::telemetry::sender::Sender::send_with_cloud_event`].
    ///
    /// # Errors
    /// Returns a description of the problem if the message carries some but not all of the
    /// `CloudEvent` required fields (`id`, `source`, `type`).
    pub fn from_telemetry<T: PayloadSerialize>(telemetry: &Message<T>) -> Result<Self, String> {
        let mut builder = CloudEventBuilder::default();
        if let Some(content_type) = &telemetry.content_type {
            builder.data_content_type(Some(content_type.clone()));
        }
        let mut time = None;
        for (key, value) in &telemetry.custom_user_data {
            match CloudEventFields::from_str(key) {
                Ok(CloudEventFields::Id) => {
                    builder.id(value.clone());
                }
                Ok(CloudEventFields::Source) => {
                    builder.source(value.clone());
                }
                Ok(CloudEventFields::SpecVersion) => {
                    builder.spec_version(value.clone());
                }
                Ok(CloudEventFields::EventType) => {
                    builder.event_type(value.clone());
                }
                Ok(CloudEventFields::Subject) => {
                    builder.subject(Some(value.clone()));
                }
                Ok(CloudEventFields::DataSchema) => {
                    builder.data_schema(Some(value.clone()));
                }
                Ok(CloudEventFields::Time) => {
                    time = chrono::DateTime::parse_from_rfc3339(value)
                        .map(|t| t.with_timezone(&chrono::Utc))
                        .ok();
                }
                Ok(CloudEventFields::DataContentType) | Err(()) => {}
            }
        }
        let mut event = builder.build().map_err(|e| e.to_string())?;
        event.time = time;
        Ok(event)
    }
}

/// Options for constructing a telemetry [`Receiver`].
#[derive(Builder, Clone)]
#[builder(setter(into))]
pub struct Options {
    /// Topic pattern for the telemetry message.
    topic_pattern: String,
    /// Namespace prepended to the compiled topic.
    #[builder(default = "None")]
    topic_namespace: Option<String>,
    /// Values for any `ex:`-prefixed custom tokens referenced by the pattern.
    #[builder(default)]
    topic_token_map: HashMap<String, String>,
    /// Upper bound on the number of handler invocations [`Receiver::run`] dispatches
    /// concurrently. Messages beyond this bound queue in the underlying subscription.
    #[builder(default = "10")]
    dispatch_concurrency: usize,
}

#[derive(PartialEq)]
enum State {
    New,
    Subscribed,
    ShutdownSuccessful,
}

/// Receives telemetry messages published to a matching topic, deserializing each one and
/// merging its HLC timestamp into the shared application clock.
pub struct Receiver<T, C>
where
    T: PayloadSerialize,
    C: ManagedClient,
{
    application_hlc: Arc<ApplicationHybridLogicalClock>,
    mqtt_client: C,
    mqtt_receiver: C::PubReceiver,
    telemetry_topic: String,
    topic_pattern: TopicPattern,
    message_payload_type: PhantomData<T>,
    state: State,
    cancellation_token: CancellationToken,
    dispatch_semaphore: Arc<Semaphore>,
}

impl<T, C> Receiver<T, C>
where
    T: PayloadSerialize + Send + 'static,
    C: ManagedClient + 'static,
{
    /// Creates a new [`Receiver`], compiling its topic pattern. Does not subscribe; the first
    /// call to [`Receiver::recv`] subscribes lazily.
    ///
    /// # Errors
    /// Returns [`ConfigurationInvalid`](crate::common::aio_protocol_error::AIOProtocolErrorKind::ConfigurationInvalid)
    /// if the compiled topic pattern is invalid.
    pub fn new(
        mqtt_client: C,
        application_context: ApplicationContext,
        receiver_options: Options,
    ) -> Result<Self, AIOProtocolError> {
        let topic_pattern = TopicPattern::new(
            &receiver_options.topic_pattern,
            receiver_options.topic_namespace.as_deref(),
            &receiver_options.topic_token_map,
        )?;
        let telemetry_topic = topic_pattern.as_subscribe_topic();
        let mqtt_receiver = mqtt_client.create_filtered_pub_receiver(&telemetry_topic);

        Ok(Self {
            application_hlc: application_context.application_hlc,
            mqtt_client,
            mqtt_receiver,
            telemetry_topic,
            topic_pattern,
            message_payload_type: PhantomData,
            state: State::New,
            cancellation_token: CancellationToken::new(),
            dispatch_semaphore: Arc::new(Semaphore::new(receiver_options.dispatch_concurrency.max(1))),
        })
    }

    async fn try_subscribe(&mut self) -> Result<(), AIOProtocolError> {
        if self.state != State::New {
            return Ok(());
        }
        self.mqtt_client.subscribe(&self.telemetry_topic, QoS::AtLeastOnce).await.map_err(|e| {
            AIOProtocolError::new_mqtt_error(
                Some("subscribe to telemetry topic failed".to_string()),
                Box::new(e),
                None,
            )
        })?;
        self.state = State::Subscribed;
        Ok(())
    }

    /// Unsubscribes from the telemetry topic, if subscribed.
    ///
    /// # Errors
    /// Returns [`MqttError`](crate::common::aio_protocol_error::AIOProtocolErrorKind::MqttError) if the unsubscribe fails.
    pub async fn shutdown(&mut self) -> Result<(), AIOProtocolError> {
        self.mqtt_receiver.close();
        if self.state == State::Subscribed {
            self.mqtt_client.unsubscribe(&self.telemetry_topic).await.map_err(|e| {
                AIOProtocolError::new_mqtt_error(
                    Some("unsubscribe from telemetry topic failed".to_string()),
                    Box::new(e),
                    None,
                )
            })?;
        }
        self.state = State::ShutdownSuccessful;
        Ok(())
    }

    /// Receives the next telemetry message, subscribing lazily on first call. Returns `None`
    /// once the underlying receiver is closed. A message that fails validation or
    /// deserialization is acked (to prevent redelivery) and logged, then skipped.
    pub async fn recv(&mut self) -> Option<Result<(Message<T>, Option<Box<dyn MqttAck>>), AIOProtocolError>> {
        if self.state == State::New {
            if let Err(e) = self.try_subscribe().await {
                return Some(Err(e));
            }
        }

        loop {
            let (publish, ack) = self.mqtt_receiver.recv_manual_ack().await?;
            let topic = publish.topic.clone();

            match Message::<T>::try_from_publish(publish) {
                Ok(mut message) => {
                    message.topic_tokens.extend(self.topic_pattern.parse_tokens(&topic));
                    if let Some(hlc) = &message.timestamp {
                        if let Err(e) = self.application_hlc.update(hlc) {
                            log::error!("failure updating application HLC against {hlc}: {e}");
                        }
                    }
                    return Some(Ok((message, ack)));
                }
                Err(e) => {
                    log::error!("dropping unparseable telemetry message on '{topic}': {e}");
                    if let Some(ack) = ack {
                        if let Err(e) = ack.ack().await {
                            log::error!("failed to ack unparseable telemetry message: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Drives [`Receiver::recv`] in a loop, dispatching each message to `handler` with
    /// concurrency bounded by [`Options::dispatch_concurrency`]. A message is acknowledged only
    /// once `handler` returns `Ok`; on `Err`, it is left unacknowledged so the broker redelivers
    /// it according to its own retry policy. Returns once the underlying receiver is closed.
    pub async fn run<H, Fut, E>(mut self, handler: H)
    where
        H: Fn(Message<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let Some(result) = self.recv().await else { break };
            let (message, ack) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("telemetry receiver error: {e}");
                    continue;
                }
            };

            let Ok(permit) = self.dispatch_semaphore.clone().acquire_owned().await else { break };
            let handler = handler.clone();
            tokio::task::spawn(async move {
                let _permit = permit;
                match handler(message).await {
                    Ok(()) => {
                        if let Some(ack) = ack {
                            if let Err(e) = ack.ack().await {
                                log::error!("failed to ack telemetry message after successful handling: {e}");
                            }
                        }
                    }
                    Err(e) => log::warn!("telemetry handler failed, leaving message unacknowledged: {e}"),
                }
            });
        }
    }
}

impl<T, C> Drop for Receiver<T, C>
where
    T: PayloadSerialize,
    C: ManagedClient,
{
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.mqtt_receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationContextOptionsBuilder;
    use crate::common::mqtt::local::LocalBroker;
    use crate::common::payload_serialize::EmptyPayload;
    use std::time::Duration;

    fn new_context() -> ApplicationContext {
        ApplicationContext::new(ApplicationContextOptionsBuilder::default().node_id("receiver-test").build().unwrap())
    }

    #[test]
    fn new_rejects_empty_topic_pattern() {
        let broker = LocalBroker::new();
        let client = broker.client("receiver-1");
        let options = OptionsBuilder::default().topic_pattern("").build().unwrap();
        let err = Receiver::<EmptyPayload, _>::new(client, new_context(), options).unwrap_err();
        assert_eq!(err.kind, crate::common::aio_protocol_error::AIOProtocolErrorKind::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn shutdown_without_subscribe_succeeds() {
        let broker = LocalBroker::new();
        let client = broker.client("receiver-2");
        let options = OptionsBuilder::default().topic_pattern("test/telemetry").build().unwrap();
        let mut receiver = Receiver::<EmptyPayload, _>::new(client, new_context(), options).unwrap();
        assert!(receiver.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn recv_returns_none_after_shutdown_with_no_messages() {
        let broker = LocalBroker::new();
        let client = broker.client("receiver-3");
        let options = OptionsBuilder::default().topic_pattern("test/telemetry").build().unwrap();
        let mut receiver = Receiver::<EmptyPayload, _>::new(client, new_context(), options).unwrap();
        receiver.shutdown().await.unwrap();
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_deserializes_a_published_message() {
        let broker = LocalBroker::new();
        let sender_client = broker.client("sender-1");
        let receiver_client = broker.client("receiver-4");
        let options = OptionsBuilder::default().topic_pattern("test/telemetry").build().unwrap();
        let mut receiver = Receiver::<EmptyPayload, _>::new(receiver_client, new_context(), options).unwrap();

        let recv_task = tokio::task::spawn(async move {
            let (message, _) = receiver.recv().await.unwrap().unwrap();
            message.payload
        });

        // give the receiver task a chance to subscribe before the sender publishes.
        tokio::time::sleep(Duration::from_millis(10)).await;

        sender_client
            .publish(Publish {
                topic: "test/telemetry".to_string(),
                payload: bytes::Bytes::new(),
                qos: QoS::AtLeastOnce,
                retain: false,
                properties: crate::common::mqtt::PublishProperties {
                    payload_format_indicator: Some(0),
                    message_expiry_interval: None,
                    response_topic: None,
                    correlation_data: None,
                    content_type: Some(EmptyPayload::content_type().to_string()),
                    user_properties: vec![],
                },
            })
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), recv_task).await.unwrap().unwrap();
        assert_eq!(payload, EmptyPayload);
    }
}
