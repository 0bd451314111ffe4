// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry sender: a fire-and-forget publish envoy. Unlike a command invoker, a telemetry
//! send has no response topic and no correlation matching — completion follows the publish-ack
//! of the underlying MQTT client.

use std::{collections::HashMap, marker::PhantomData, time::Duration};

use crate::application::ApplicationContext;
use crate::common::{
    aio_protocol_error::AIOProtocolError,
    mqtt::{ManagedClient, Publish, PublishProperties, QoS},
    payload_serialize::PayloadSerialize,
    topic_processor::TopicPattern,
    user_properties::{self, validate_user_properties, UserProperty},
};
use crate::telemetry::cloud_event::CloudEvent;

/// A single outbound telemetry message.
#[derive(Builder, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct Message<T>
where
    T: PayloadSerialize,
{
    /// Serialized payload of the message.
    #[builder(setter(custom))]
    payload: Vec<u8>,
    /// Strongly links this message with its payload type.
    #[builder(private)]
    message_payload_type: PhantomData<T>,
    /// Custom MQTT user properties to attach, in addition to this crate's reserved properties.
    #[builder(default)]
    custom_user_data: Vec<(String, String)>,
    /// `CloudEvent` envelope to attach as additional user properties, if any.
    #[builder(default = "None")]
    cloud_event: Option<CloudEvent>,
    /// Quality of service to publish at.
    #[builder(default = "QoS::AtLeastOnce")]
    qos: QoS,
    /// How long the broker may retain the message before discarding it undelivered.
    #[builder(default = "None")]
    message_expiry_interval: Option<Duration>,
    /// Values for any `ex:`-prefixed custom tokens referenced by the sender's topic pattern,
    /// beyond `{senderId}` (which the sender substitutes automatically).
    #[builder(default)]
    topic_tokens: HashMap<String, String>,
}

impl<T: PayloadSerialize> MessageBuilder<T> {
    /// Serializes `payload` and attaches it to the message.
    ///
    /// # Errors
    /// Returns [`PayloadSerialize::SerializerError`] if serialization fails.
    pub fn payload(&mut self, payload: &T) -> Result<&mut Self, T::SerializerError> {
        self.payload = Some(payload.serialize()?);
        self.message_payload_type = Some(PhantomData);
        Ok(self)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(custom_user_data) = &self.custom_user_data {
            validate_user_properties(custom_user_data)?;
        }
        Ok(())
    }
}

/// Options for constructing a telemetry [`Sender`].
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
}

/// Publishes telemetry messages to a topic derived from a compiled pattern.
pub struct Sender<T, C>
where
    T: PayloadSerialize,
    C: ManagedClient,
{
    mqtt_client: C,
    application_context: ApplicationContext,
    topic_pattern: TopicPattern,
    message_payload_type: PhantomData<T>,
}

impl<T, C> Sender<T, C>
where
    T: PayloadSerialize,
    C: ManagedClient,
{
    /// Creates a new [`Sender`], compiling its topic pattern. Substitutes `{senderId}` with the
    /// client's own MQTT client ID, if the pattern uses that token.
    ///
    /// # Errors
    /// Returns [`ConfigurationInvalid`](crate::common::aio_protocol_error::AIOProtocolErrorKind::ConfigurationInvalid)
    /// if the compiled topic pattern is invalid.
    pub fn new(
        mqtt_client: C,
        application_context: ApplicationContext,
        sender_options: Options,
    ) -> Result<Self, AIOProtocolError> {
        let mut token_map = sender_options.topic_token_map;
        token_map.insert("senderId".to_string(), mqtt_client.client_id().to_string());

        let topic_pattern = TopicPattern::new(
            &sender_options.topic_pattern,
            sender_options.topic_namespace.as_deref(),
            &token_map,
        )?;

        Ok(Self { mqtt_client, application_context, topic_pattern, message_payload_type: PhantomData })
    }

    /// Publishes `message`, stamping `__ts` (and `__srcId`) and attaching any `CloudEvent`
    /// headers, then returning once the broker has acknowledged the publish (QoS 1/2) or
    /// immediately (QoS 0).
    ///
    /// # Errors
    /// Returns [`ConfigurationInvalid`](crate::common::aio_protocol_error::AIOProtocolErrorKind::ConfigurationInvalid)
    /// if the topic pattern requires a token `message.topic_tokens` does not supply, or
    /// [`MqttError`](crate::common::aio_protocol_error::AIOProtocolErrorKind::MqttError) if the
    /// publish fails.
    pub async fn send(&self, mut message: Message<T>) -> Result<(), AIOProtocolError> {
        let content_type = T::content_type();
        if user_properties::is_invalid_utf8(content_type) {
            return Err(AIOProtocolError::new_payload_invalid_error(
                false,
                None,
                None,
                Some(format!("content type '{content_type}' isn't valid MQTT UTF-8")),
                None,
            ));
        }

        let topic = self.topic_pattern.as_publish_topic(&message.topic_tokens)?;

        message
            .custom_user_data
            .push((UserProperty::SourceId.to_string(), self.mqtt_client.client_id().to_string()));
        message
            .custom_user_data
            .push((UserProperty::Timestamp.to_string(), self.application_context.application_hlc.update_now()?));
        if let Some(cloud_event) = message.cloud_event {
            message.custom_user_data.extend(cloud_event.to_headers());
        }

        let publish = Publish {
            topic,
            payload: bytes::Bytes::from(message.payload),
            qos: message.qos,
            retain: false,
            properties: PublishProperties {
                payload_format_indicator: Some(T::format_indicator() as u8),
                message_expiry_interval: message
                    .message_expiry_interval
                    .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX)),
                response_topic: None,
                correlation_data: None,
                content_type: Some(content_type.to_string()),
                user_properties: message.custom_user_data,
            },
        };

        self.mqtt_client
            .publish(publish)
            .await
            .map_err(|e| AIOProtocolError::new_mqtt_error(Some("telemetry publish failed".to_string()), Box::new(e), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationContextOptionsBuilder;
    use crate::common::mqtt::local::LocalBroker;
    use crate::common::mqtt::MqttPubSub;
    use crate::common::payload_serialize::EmptyPayload;

    fn new_context() -> ApplicationContext {
        ApplicationContext::new(ApplicationContextOptionsBuilder::default().node_id("sender-test").build().unwrap())
    }

    #[test]
    fn new_rejects_empty_topic_pattern() {
        let broker = LocalBroker::new();
        let client = broker.client("sender-1");
        let options = OptionsBuilder::default().topic_pattern("").build().unwrap();
        let err = Sender::<EmptyPayload, _>::new(client, new_context(), options).unwrap_err();
        assert_eq!(err.kind, crate::common::aio_protocol_error::AIOProtocolErrorKind::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn send_publishes_to_the_compiled_topic() {
        let broker = LocalBroker::new();
        let client = broker.client("sender-2");
        let options = OptionsBuilder::default().topic_pattern("test/telemetry").build().unwrap();
        let sender = Sender::<EmptyPayload, _>::new(client.clone(), new_context(), options).unwrap();

        client.subscribe("test/telemetry", QoS::AtLeastOnce).await.unwrap();
        let mut receiver = client.create_filtered_pub_receiver("test/telemetry");

        let message = MessageBuilder::default().payload(&EmptyPayload).unwrap().build().unwrap();
        sender.send(message).await.unwrap();

        let (publish, _) = receiver.recv_manual_ack().await.unwrap();
        assert_eq!(publish.topic, "test/telemetry");
        assert!(publish.properties.user_properties.iter().any(|(k, _)| k == "__ts"));
    }
}
