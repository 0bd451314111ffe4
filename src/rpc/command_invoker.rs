// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command invoker: publishes a request and awaits the matching response by correlation data.

use std::{collections::HashMap, marker::PhantomData, str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::status_code::StatusCode;
use crate::application::ApplicationContext;
use crate::common::{
    aio_protocol_error::{AIOProtocolError, AIOProtocolErrorKind, Value},
    hybrid_logical_clock::HybridLogicalClock,
    mqtt::{ManagedClient, Publish, PublishProperties, PubReceiver, QoS},
    payload_serialize::{FormatIndicator, PayloadSerialize},
    topic_processor::{contains_invalid_char, TopicPattern},
    user_properties::{self, validate_user_properties, UserProperty},
};

/// A command invocation request.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct CommandRequest<TReq>
where
    TReq: PayloadSerialize,
{
    /// Serialized payload of the request.
    #[builder(setter(custom))]
    payload: Vec<u8>,
    /// Strongly links this request with its payload type.
    #[builder(private)]
    request_payload_type: PhantomData<TReq>,
    /// Custom MQTT user properties forwarded to the executor.
    #[builder(default)]
    custom_user_data: Vec<(String, String)>,
    /// Fencing token used by the executor to order competing writes.
    #[builder(default = "None")]
    fencing_token: Option<HybridLogicalClock>,
    /// Executor ID to substitute into the request/response topics, when the topic requires one.
    #[builder(default = "None")]
    executor_id: Option<String>,
    /// Deadline for the whole invocation, also sent as the request's message expiry interval.
    timeout: Duration,
}

impl<TReq: PayloadSerialize> CommandRequestBuilder<TReq> {
    /// Serializes `payload` and attaches it to the request.
    ///
    /// # Errors
    /// Returns [`PayloadSerialize::SerializerError`] if serialization fails.
    pub fn payload(&mut self, payload: &TReq) -> Result<&mut Self, TReq::SerializerError> {
        self.payload = Some(payload.serialize()?);
        self.request_payload_type = Some(PhantomData);
        Ok(self)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(custom_user_data) = &self.custom_user_data {
            validate_user_properties(custom_user_data)?;
        }
        if let Some(timeout) = &self.timeout {
            if timeout.as_millis() < 1 {
                return Err("timeout must be at least 1 ms".to_string());
            }
            if u32::try_from(timeout.as_secs()).is_err() {
                return Err("timeout in seconds must fit in a u32 message expiry interval".to_string());
            }
        }
        Ok(())
    }
}

/// A command invocation response.
#[derive(Debug)]
pub struct CommandResponse<TResp>
where
    TResp: PayloadSerialize,
{
    /// Deserialized response payload.
    pub payload: TResp,
    /// Custom MQTT user properties the executor attached to the response.
    pub custom_user_data: Vec<(String, String)>,
    /// The executor's HLC timestamp at the time the response was produced.
    pub timestamp: Option<HybridLogicalClock>,
}

/// Options for constructing a [`CommandInvoker`].
#[derive(Builder, Clone)]
#[builder(setter(into))]
pub struct CommandInvokerOptions {
    /// Topic pattern for the command request.
    request_topic_pattern: String,
    /// Topic pattern for the command response. Derived from `request_topic_pattern` and the
    /// prefix/suffix options when not given.
    #[builder(default = "None")]
    response_topic_pattern: Option<String>,
    /// Name of the command, substituted for the `{commandName}` token.
    command_name: String,
    /// Model ID, substituted for the `{modelId}` token, if the pattern requires one.
    #[builder(default = "None")]
    model_id: Option<String>,
    /// Namespace prepended to every compiled topic.
    #[builder(default = "None")]
    topic_namespace: Option<String>,
    /// Values for any `ex:`-prefixed custom tokens referenced by the patterns.
    #[builder(default)]
    custom_topic_token_map: HashMap<String, String>,
    /// Prefix prepended to a derived response topic pattern.
    #[builder(default = "Some(\"clients/{invokerClientId}\".to_string())")]
    response_topic_prefix: Option<String>,
    /// Suffix appended to a derived response topic pattern.
    #[builder(default = "None")]
    response_topic_suffix: Option<String>,
}

/// Removes a correlation record from the pending map on drop, regardless of which path an
/// invocation exits through (response, timeout, cancellation, or an early `?`).
struct PendingGuard<'a> {
    pending: &'a std::sync::Mutex<HashMap<Bytes, oneshot::Sender<Publish>>>,
    correlation_data: &'a Bytes,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().expect("pending mutex poisoned").remove(self.correlation_data);
    }
}

/// Invokes commands against one or more command executors over MQTT, matching each response to
/// its request by correlation data.
pub struct CommandInvoker<TReq, TResp, C>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
    C: ManagedClient,
{
    mqtt_client: C,
    application_context: ApplicationContext,
    command_name: String,
    request_topic_pattern: TopicPattern,
    response_topic_pattern: TopicPattern,
    request_payload_type: PhantomData<TReq>,
    response_payload_type: PhantomData<TResp>,
    subscribed: Arc<Mutex<bool>>,
    pending: Arc<std::sync::Mutex<HashMap<Bytes, oneshot::Sender<Publish>>>>,
    recv_cancellation_token: CancellationToken,
}

impl<TReq, TResp, C> CommandInvoker<TReq, TResp, C>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
    C: ManagedClient + 'static,
{
    /// Creates a new [`CommandInvoker`], compiling its request/response topic patterns.
    ///
    /// # Errors
    /// Returns [`ConfigurationInvalid`](AIOProtocolErrorKind::ConfigurationInvalid) if
    /// `command_name` is empty or invalid, or if the compiled topic patterns are invalid.
    pub fn new(
        mqtt_client: C,
        application_context: ApplicationContext,
        invoker_options: CommandInvokerOptions,
    ) -> Result<Self, AIOProtocolError> {
        if invoker_options.command_name.is_empty()
            || contains_invalid_char(&invoker_options.command_name)
        {
            return Err(AIOProtocolError::new_configuration_invalid_error(
                None,
                "command_name",
                Value::String(invoker_options.command_name.clone()),
                None,
                Some(invoker_options.command_name),
            ));
        }

        let mut token_map = invoker_options.custom_topic_token_map.clone();
        token_map.insert("commandName".to_string(), invoker_options.command_name.clone());
        token_map.insert("invokerClientId".to_string(), mqtt_client.client_id().to_string());
        if let Some(model_id) = &invoker_options.model_id {
            token_map.insert("modelId".to_string(), model_id.clone());
        }

        let response_pattern_str = if let Some(pattern) = invoker_options.response_topic_pattern {
            pattern
        } else {
            let mut pattern = invoker_options.request_topic_pattern.clone();
            if let Some(prefix) = &invoker_options.response_topic_prefix {
                pattern = format!("{prefix}/{pattern}");
            }
            if let Some(suffix) = &invoker_options.response_topic_suffix {
                pattern = format!("{pattern}/{suffix}");
            }
            pattern
        };

        let request_topic_pattern = TopicPattern::new(
            &invoker_options.request_topic_pattern,
            invoker_options.topic_namespace.as_deref(),
            &token_map,
        )?;
        let response_topic_pattern =
            TopicPattern::new(&response_pattern_str, invoker_options.topic_namespace.as_deref(), &token_map)?;

        let mut mqtt_receiver =
            mqtt_client.create_filtered_pub_receiver(&response_topic_pattern.as_subscribe_topic());

        let pending: Arc<std::sync::Mutex<HashMap<Bytes, oneshot::Sender<Publish>>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));
        let recv_cancellation_token = CancellationToken::new();

        tokio::task::spawn({
            let pending = pending.clone();
            let cancellation_token = recv_cancellation_token.clone();
            let command_name = invoker_options.command_name.clone();
            async move {
                loop {
                    tokio::select! {
                        () = cancellation_token.cancelled() => {
                            mqtt_receiver.close();
                            break;
                        }
                        received = mqtt_receiver.recv_manual_ack() => {
                            let Some((publish, ack)) = received else {
                                log::debug!("[{command_name}] response receiver closed");
                                break;
                            };
                            if let Some(correlation_data) = &publish.properties.correlation_data {
                                if let Some(tx) = pending.lock().expect("pending mutex poisoned").remove(correlation_data) {
                                    let _ = tx.send(publish);
                                } else {
                                    log::debug!("[{command_name}] response with no pending invocation for correlation data");
                                }
                            } else {
                                log::warn!("[{command_name}] response missing correlation data, dropping");
                            }
                            if let Some(ack) = ack {
                                if let Err(e) = ack.ack().await {
                                    log::error!("[{command_name}] failed to ack response: {e}");
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            mqtt_client,
            application_context,
            command_name: invoker_options.command_name,
            request_topic_pattern,
            response_topic_pattern,
            request_payload_type: PhantomData,
            response_payload_type: PhantomData,
            subscribed: Arc::new(Mutex::new(false)),
            pending,
            recv_cancellation_token,
        })
    }

    /// Invokes a command, returning its response or failing with [`Timeout`](AIOProtocolErrorKind::Timeout)
    /// once `request.timeout` elapses, or [`Cancelled`](AIOProtocolErrorKind::Cancelled) if `cancel`
    /// fires first.
    ///
    /// `cancel` is polled at every suspension point of the invocation; cancelling it evicts the
    /// pending correlation record the same way a timeout does.
    ///
    /// # Errors
    /// See module-level error kinds; a non-2xx `__stat` on the response is surfaced as
    /// [`ExecutionException`](AIOProtocolErrorKind::ExecutionException) or
    /// [`HeaderInvalid`](AIOProtocolErrorKind::HeaderInvalid) depending on the status.
    pub async fn invoke(
        &self,
        request: CommandRequest<TReq>,
        cancel: CancellationToken,
    ) -> Result<CommandResponse<TResp>, AIOProtocolError> {
        self.invoke_internal(request, cancel).await
    }

    /// Unsubscribes from the response topic and fails every invocation still awaiting a response
    /// with [`Cancelled`](AIOProtocolErrorKind::Cancelled).
    ///
    /// # Errors
    /// Returns [`MqttError`](AIOProtocolErrorKind::MqttError) if the unsubscribe fails.
    pub async fn stop(&self) -> Result<(), AIOProtocolError> {
        self.pending.lock().expect("pending mutex poisoned").clear();
        let mut subscribed = self.subscribed.lock().await;
        if *subscribed {
            self.mqtt_client
                .unsubscribe(&self.response_topic_pattern.as_subscribe_topic())
                .await
                .map_err(|e| {
                    AIOProtocolError::new_mqtt_error(
                        Some("unsubscribe from response topic failed".to_string()),
                        Box::new(e),
                        Some(self.command_name.clone()),
                    )
                })?;
            *subscribed = false;
        }
        Ok(())
    }

    async fn ensure_subscribed(&self) -> Result<(), AIOProtocolError> {
        let mut subscribed = self.subscribed.lock().await;
        if !*subscribed {
            self.mqtt_client
                .subscribe(&self.response_topic_pattern.as_subscribe_topic(), QoS::AtLeastOnce)
                .await
                .map_err(|e| {
                    AIOProtocolError::new_mqtt_error(
                        Some("subscribe to response topic failed".to_string()),
                        Box::new(e),
                        Some(self.command_name.clone()),
                    )
                })?;
            *subscribed = true;
        }
        Ok(())
    }

    async fn invoke_internal(
        &self,
        mut request: CommandRequest<TReq>,
        cancel: CancellationToken,
    ) -> Result<CommandResponse<TResp>, AIOProtocolError> {
        let message_expiry_interval: u32 = request
            .timeout
            .as_secs()
            .try_into()
            .expect("validated by CommandRequestBuilder::validate");

        let mut tokens = HashMap::new();
        if let Some(executor_id) = &request.executor_id {
            tokens.insert("executorId".to_string(), executor_id.clone());
        }
        let request_topic = self.request_topic_pattern.as_publish_topic(&tokens)?;
        let response_topic = self.response_topic_pattern.as_publish_topic(&tokens)?;

        let content_type = TReq::content_type();
        if user_properties::is_invalid_utf8(content_type) {
            return Err(AIOProtocolError::new_payload_invalid_error(
                false,
                None,
                None,
                Some(format!("content type '{content_type}' isn't valid MQTT UTF-8")),
                Some(self.command_name.clone()),
            ));
        }

        let correlation_id = Uuid::new_v4();
        let correlation_data = Bytes::copy_from_slice(correlation_id.as_bytes());

        request
            .custom_user_data
            .push((UserProperty::CommandInvokerId.to_string(), self.mqtt_client.client_id().to_string()));
        request.custom_user_data.push((
            UserProperty::Timestamp.to_string(),
            self.application_context.application_hlc.update_now()?,
        ));
        if let Some(fencing_token) = &request.fencing_token {
            request
                .custom_user_data
                .push((UserProperty::FencingToken.to_string(), fencing_token.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending mutex poisoned").insert(correlation_data.clone(), tx);
        let _pending_guard = PendingGuard {
            pending: &self.pending,
            correlation_data: &correlation_data,
        };

        self.ensure_subscribed().await?;

        let publish = Publish {
            topic: request_topic,
            payload: bytes::Bytes::from(request.payload),
            qos: QoS::AtLeastOnce,
            retain: false,
            properties: PublishProperties {
                payload_format_indicator: Some(TReq::format_indicator() as u8),
                message_expiry_interval: Some(message_expiry_interval),
                response_topic: Some(response_topic),
                correlation_data: Some(correlation_data.clone()),
                content_type: Some(content_type.to_string()),
                user_properties: request.custom_user_data,
            },
        };

        if let Err(e) = self.mqtt_client.publish(publish).await {
            return Err(AIOProtocolError::new_mqtt_error(
                Some("publish of command request failed".to_string()),
                Box::new(e),
                Some(self.command_name.clone()),
            ));
        }

        let response_publish = tokio::select! {
            () = cancel.cancelled() => {
                return Err(AIOProtocolError::new_cancelled_error(
                    Some("invocation was cancelled by caller".to_string()),
                    Some(self.command_name.clone()),
                ));
            }
            () = tokio::time::sleep(request.timeout) => {
                log::error!("[{}] command invoke timed out after {:?}", self.command_name, request.timeout);
                return Err(AIOProtocolError::new_timeout_error(
                    "invoke",
                    request.timeout,
                    None,
                    Some(self.command_name.clone()),
                ));
            }
            received = rx => {
                received.map_err(|_| {
                    AIOProtocolError::new_cancelled_error(
                        Some("response receiver shut down before a response arrived".to_string()),
                        Some(self.command_name.clone()),
                    )
                })?
            }
        };

        self.parse_response(&response_publish)
    }

    fn parse_response(&self, publish: &Publish) -> Result<CommandResponse<TResp>, AIOProtocolError> {
        let properties = &publish.properties;

        if let Some(content_type) = &properties.content_type {
            if content_type != TResp::content_type() {
                return Err(AIOProtocolError::new_header_invalid_error(
                    "Content Type",
                    content_type,
                    true,
                    Some(format!(
                        "content type '{content_type}' is not supported; only '{}' is accepted",
                        TResp::content_type()
                    )),
                    Some(self.command_name.clone()),
                ));
            }
        }
        if let Some(format_indicator) = properties.payload_format_indicator {
            if format_indicator != FormatIndicator::UnspecifiedBytes as u8
                && format_indicator != TResp::format_indicator() as u8
            {
                return Err(AIOProtocolError::new_header_invalid_error(
                    "Payload Format Indicator",
                    &format_indicator.to_string(),
                    true,
                    Some("format indicator does not match the expected payload type".to_string()),
                    Some(self.command_name.clone()),
                ));
            }
        }

        let mut status: Option<StatusCode> = None;
        let mut status_message: Option<String> = None;
        let mut is_application_error = false;
        let mut invalid_property_name: Option<String> = None;
        let mut invalid_property_value: Option<String> = None;
        let mut timestamp: Option<HybridLogicalClock> = None;
        let mut custom_user_data = Vec::new();

        for (key, value) in &properties.user_properties {
            match UserProperty::from_str(key) {
                Ok(UserProperty::Timestamp) => {
                    let hlc = HybridLogicalClock::from_str(value).map_err(|mut e| {
                        e.command_name = Some(self.command_name.clone());
                        e
                    })?;
                    self.application_context.application_hlc.update(&hlc)?;
                    timestamp = Some(hlc);
                }
                Ok(UserProperty::Status) => {
                    status = Some(StatusCode::from_str(value).map_err(|mut e| {
                        e.command_name = Some(self.command_name.clone());
                        e
                    })?);
                }
                Ok(UserProperty::StatusMessage) => status_message = Some(value.clone()),
                Ok(UserProperty::IsApplicationError) => {
                    is_application_error = value.eq_ignore_ascii_case("true");
                }
                Ok(UserProperty::InvalidPropertyName) => invalid_property_name = Some(value.clone()),
                Ok(UserProperty::InvalidPropertyValue) => invalid_property_value = Some(value.clone()),
                Ok(_) => log::warn!("[{}] response carried unexpected reserved property '{key}'", self.command_name),
                Err(()) if key.starts_with(user_properties::RESERVED_PREFIX) => {
                    log::warn!("[{}] response carried unrecognized reserved property '{key}'", self.command_name);
                }
                Err(()) => custom_user_data.push((key.clone(), value.clone())),
            }
        }

        let status = status.ok_or_else(|| {
            AIOProtocolError::new_header_invalid_error(
                "__stat",
                "",
                true,
                Some("response did not carry a status".to_string()),
                Some(self.command_name.clone()),
            )
        })?;

        match status {
            StatusCode::Ok => {
                let payload = TResp::deserialize(&publish.payload).map_err(|e| {
                    AIOProtocolError::new_payload_invalid_error(
                        true,
                        Some(e.into()),
                        Some(StatusCode::Ok as u16),
                        Some("failed to deserialize response payload".to_string()),
                        Some(self.command_name.clone()),
                    )
                })?;
                Ok(CommandResponse { payload, custom_user_data, timestamp })
            }
            StatusCode::BadRequest => Err(AIOProtocolError::new_header_invalid_error(
                invalid_property_name.as_deref().unwrap_or("Not Specified"),
                invalid_property_value.as_deref().unwrap_or("Not Specified"),
                true,
                status_message,
                Some(self.command_name.clone()),
            )),
            StatusCode::Timeout => Err(AIOProtocolError::new_timeout_error(
                "invoke",
                Duration::default(),
                status_message,
                Some(self.command_name.clone()),
            )),
            StatusCode::NotFound
            | StatusCode::RequestVersionNotSupported
            | StatusCode::UnsupportedMediaType
            | StatusCode::UnprocessableContent
            | StatusCode::InternalError
            | StatusCode::ServiceUnavailable => {
                let mut err =
                    AIOProtocolError::new_execution_exception_error(status as u16, true, status_message, Some(self.command_name.clone()));
                err.in_application = is_application_error;
                Err(err)
            }
        }
    }
}

impl<TReq, TResp, C> Drop for CommandInvoker<TReq, TResp, C>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
    C: ManagedClient,
{
    fn drop(&mut self) {
        self.recv_cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationContextOptionsBuilder;
    use crate::common::mqtt::local::LocalBroker;
    use crate::common::payload_serialize::EmptyPayload;

    fn new_context() -> ApplicationContext {
        ApplicationContext::new(ApplicationContextOptionsBuilder::default().node_id("invoker-test").build().unwrap())
    }

    #[test]
    fn rejects_empty_command_name() {
        let broker = LocalBroker::new();
        let client = broker.client("invoker-1");
        let options = CommandInvokerOptionsBuilder::default()
            .request_topic_pattern("test/{commandName}")
            .command_name(String::new())
            .build()
            .unwrap();
        let err = CommandInvoker::<EmptyPayload, EmptyPayload, _>::new(client, new_context(), options).unwrap_err();
        assert_eq!(err.kind, AIOProtocolErrorKind::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn invoke_times_out_with_no_executor() {
        let broker = LocalBroker::new();
        let client = broker.client("invoker-2");
        let options = CommandInvokerOptionsBuilder::default()
            .request_topic_pattern("test/{commandName}")
            .command_name("increment")
            .build()
            .unwrap();
        let invoker = CommandInvoker::<EmptyPayload, EmptyPayload, _>::new(client, new_context(), options).unwrap();
        let request = CommandRequestBuilder::default()
            .payload(&EmptyPayload)
            .unwrap()
            .timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let err = invoker.invoke(request, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, AIOProtocolErrorKind::Timeout);
    }
}
