// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command executor: receives requests published by a command invoker, dispatches them to an
//! application handler, and publishes the resulting response (or error) back to the invoker.

use std::{
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    str::FromStr,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::cache::{Cache, CacheKey, CacheLookupResult};
use super::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_RPC_COMMAND_PROTOCOL_VERSION, SUPPORTED_RPC_COMMAND_PROTOCOL_VERSIONS,
};
use crate::application::ApplicationContext;
use crate::common::{
    aio_protocol_error::{AIOProtocolError, AIOProtocolErrorKind, Value},
    hybrid_logical_clock::HybridLogicalClock,
    mqtt::{ManagedClient, MqttAck, Publish, PublishProperties, PubReceiver, QoS},
    payload_serialize::{FormatIndicator, PayloadSerialize},
    topic_processor::{contains_invalid_char, is_valid_replacement, TopicPattern},
    user_properties::{self, validate_user_properties, UserProperty},
};
use crate::rpc::StatusCode;
use crate::ProtocolVersion;

const DEFAULT_MESSAGE_EXPIRY_INTERVAL_SECONDS: u32 = 10;

/// A single inbound command request, handed to application code by [`CommandExecutor::recv`] or
/// [`CommandExecutor::run`]. The handler owns this value and must eventually call
/// [`Request::complete`] to publish a response, whether or not the command succeeded.
pub struct Request<TReq, TResp>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
{
    /// Deserialized request payload.
    pub payload: TReq,
    /// Custom MQTT user properties the invoker attached to the request.
    pub custom_user_data: Vec<(String, String)>,
    /// The invoker's HLC timestamp at the time the request was sent, if present.
    pub timestamp: Option<HybridLogicalClock>,
    /// MQTT client ID of the invoker that sent this request, if present.
    pub invoker_id: Option<String>,
    /// Fencing token attached to the request, used to order competing writes.
    pub fencing_token: Option<HybridLogicalClock>,
    /// Every topic token parsed out of the concrete request topic.
    pub topic_tokens: HashMap<String, String>,

    command_name: String,
    response_tx: oneshot::Sender<Result<Response<TResp>, AIOProtocolError>>,
    completion_rx: oneshot::Receiver<Result<(), AIOProtocolError>>,
}

impl<TReq, TResp> Request<TReq, TResp>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
{
    /// Whether the executor has already given up on this request (its expiry elapsed, or the
    /// executor is shutting down) — a handler may poll this to abandon expensive work early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.response_tx.is_closed()
    }

    /// Delivers the application's `result` to the executor, which publishes the corresponding
    /// response (or error status) to the invoker. Resolves once the publish has been confirmed.
    ///
    /// # Errors
    /// Returns [`Cancelled`](AIOProtocolErrorKind::Cancelled) if the request's expiry elapsed
    /// before `complete` was called, or if the response publish itself failed.
    pub async fn complete(self, result: Result<Response<TResp>, AIOProtocolError>) -> Result<(), AIOProtocolError> {
        if self.response_tx.send(result).is_err() {
            return Err(AIOProtocolError::new_cancelled_error(
                Some("request expired or the executor shut down before a response was ready".to_string()),
                Some(self.command_name),
            ));
        }
        self.completion_rx.await.map_err(|_| {
            AIOProtocolError::new_cancelled_error(
                Some("response dispatch task ended before confirming delivery".to_string()),
                Some(self.command_name),
            )
        })?
    }
}

/// A command's response payload, constructed by application code and handed to
/// [`Request::complete`].
#[derive(Builder, Clone)]
#[builder(setter(into), build_fn(validate = "ResponseBuilder::validate"))]
pub struct Response<TResp>
where
    TResp: PayloadSerialize,
{
    /// Serialized response payload.
    #[builder(setter(custom))]
    serialized_payload: Vec<u8>,
    /// Strongly links this response with its payload type.
    #[builder(private)]
    response_payload_type: PhantomData<TResp>,
    /// Custom MQTT user properties forwarded to the invoker.
    #[builder(default)]
    custom_user_data: Vec<(String, String)>,
}

impl<TResp: PayloadSerialize> ResponseBuilder<TResp> {
    /// Serializes `payload` and attaches it to the response.
    ///
    /// # Errors
    /// Returns [`PayloadSerialize::SerializerError`] if serialization fails.
    pub fn payload(&mut self, payload: &TResp) -> Result<&mut Self, TResp::SerializerError> {
        self.serialized_payload = Some(payload.serialize()?);
        self.response_payload_type = Some(PhantomData);
        Ok(self)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(custom_user_data) = &self.custom_user_data {
            validate_user_properties(custom_user_data)?;
        }
        Ok(())
    }
}

/// Options for constructing a [`CommandExecutor`].
#[derive(Builder, Clone)]
#[builder(setter(into))]
pub struct CommandExecutorOptions {
    /// Topic pattern for the command request.
    request_topic_pattern: String,
    /// Name of the command, substituted for the `{commandName}` token.
    command_name: String,
    /// Namespace prepended to the compiled topic.
    #[builder(default = "None")]
    topic_namespace: Option<String>,
    /// Values for any `ex:`-prefixed custom tokens referenced by the pattern.
    #[builder(default)]
    custom_topic_token_map: HashMap<String, String>,
    /// Whether repeated deliveries of the same correlation id should be answered from cache
    /// instead of re-invoking the handler. Appropriate only for handlers that are safe to
    /// memoize (true idempotent commands); non-idempotent commands should leave this `false`.
    #[builder(default = "false")]
    is_idempotent: bool,
    /// How long a completed response is retained for replay once `is_idempotent` is set.
    #[builder(default = "Duration::from_secs(super::CACHE_EXPIRY_BUFFER_SECONDS)")]
    cacheable_duration: Duration,
    /// Upper bound on the number of cache entries retained at once.
    #[builder(default = "DEFAULT_CACHE_MAX_ENTRIES")]
    max_cache_entries: usize,
    /// Maximum number of handler invocations [`CommandExecutor::run`] allows to run concurrently.
    #[builder(default = "10")]
    dispatch_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Subscribed,
    ShutdownSuccessful,
}

/// Receives command requests published by one or more command invokers, dispatching each to an
/// application handler and publishing its response.
pub struct CommandExecutor<TReq, TResp, C>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
    C: ManagedClient,
{
    mqtt_client: C,
    application_context: ApplicationContext,
    command_name: String,
    request_topic_pattern: TopicPattern,
    is_idempotent: bool,
    cacheable_duration: Duration,
    cache: Cache,
    dispatch_semaphore: Arc<Semaphore>,
    state: Arc<StdMutex<State>>,
    mqtt_receiver: Arc<Mutex<C::PubReceiver>>,
    shutdown_cancellation_token: CancellationToken,
    request_payload_type: PhantomData<TReq>,
    response_payload_type: PhantomData<TResp>,
}

impl<TReq, TResp, C> CommandExecutor<TReq, TResp, C>
where
    TReq: PayloadSerialize + Send + 'static,
    TResp: PayloadSerialize + Send + 'static,
    C: ManagedClient + 'static,
{
    /// Creates a new [`CommandExecutor`], compiling its request topic pattern. Does not
    /// subscribe; the first call to [`CommandExecutor::recv`] or [`CommandExecutor::run`]
    /// subscribes lazily.
    ///
    /// # Errors
    /// Returns [`ConfigurationInvalid`](AIOProtocolErrorKind::ConfigurationInvalid) if
    /// `command_name` is empty or invalid, or if the compiled topic pattern is invalid.
    pub fn new(
        mqtt_client: C,
        application_context: ApplicationContext,
        executor_options: CommandExecutorOptions,
    ) -> Result<Self, AIOProtocolError> {
        if executor_options.command_name.is_empty() || contains_invalid_char(&executor_options.command_name) {
            return Err(AIOProtocolError::new_configuration_invalid_error(
                None,
                "command_name",
                Value::String(executor_options.command_name.clone()),
                None,
                Some(executor_options.command_name),
            ));
        }

        let mut token_map = executor_options.custom_topic_token_map.clone();
        token_map.insert("commandName".to_string(), executor_options.command_name.clone());
        token_map.insert("executorId".to_string(), mqtt_client.client_id().to_string());

        let request_topic_pattern = TopicPattern::new(
            &executor_options.request_topic_pattern,
            executor_options.topic_namespace.as_deref(),
            &token_map,
        )?;

        let mqtt_receiver = mqtt_client.create_filtered_pub_receiver(&request_topic_pattern.as_subscribe_topic());

        let cache = Cache::new(executor_options.max_cache_entries);
        let shutdown_cancellation_token = CancellationToken::new();
        cache.spawn_sweeper(shutdown_cancellation_token.clone());

        Ok(Self {
            mqtt_client,
            application_context,
            command_name: executor_options.command_name,
            request_topic_pattern,
            is_idempotent: executor_options.is_idempotent,
            cacheable_duration: executor_options.cacheable_duration,
            cache,
            dispatch_semaphore: Arc::new(Semaphore::new(executor_options.dispatch_concurrency)),
            state: Arc::new(StdMutex::new(State::New)),
            mqtt_receiver: Arc::new(Mutex::new(mqtt_receiver)),
            shutdown_cancellation_token,
            request_payload_type: PhantomData,
            response_payload_type: PhantomData,
        })
    }

    async fn try_subscribe(&self) -> Result<(), AIOProtocolError> {
        let already_subscribed = { *self.state.lock().expect("state mutex poisoned") != State::New };
        if already_subscribed {
            return Ok(());
        }
        self.mqtt_client
            .subscribe(&self.request_topic_pattern.as_subscribe_topic(), QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                AIOProtocolError::new_mqtt_error(
                    Some("subscribe to request topic failed".to_string()),
                    Box::new(e),
                    Some(self.command_name.clone()),
                )
            })?;
        *self.state.lock().expect("state mutex poisoned") = State::Subscribed;
        Ok(())
    }

    /// Unsubscribes from the request topic and stops the background cache sweeper. Outstanding
    /// in-flight requests are left to finish or expire naturally.
    ///
    /// # Errors
    /// Returns [`MqttError`](AIOProtocolErrorKind::MqttError) if the unsubscribe fails.
    pub async fn shutdown(&self) -> Result<(), AIOProtocolError> {
        self.mqtt_client
            .unsubscribe(&self.request_topic_pattern.as_subscribe_topic())
            .await
            .map_err(|e| {
                AIOProtocolError::new_mqtt_error(
                    Some("unsubscribe from request topic failed".to_string()),
                    Box::new(e),
                    Some(self.command_name.clone()),
                )
            })?;
        self.shutdown_cancellation_token.cancel();
        *self.state.lock().expect("state mutex poisoned") = State::ShutdownSuccessful;
        Ok(())
    }

    /// Pulls the next request, handling protocol-level validation, cache replay, and HLC
    /// bookkeeping internally. Returns `None` once the underlying receiver is closed (after
    /// [`CommandExecutor::shutdown`]). Only one caller should drive `recv` at a time.
    pub async fn recv(&self) -> Option<Request<TReq, TResp>> {
        self.try_subscribe().await.ok()?;
        loop {
            let mut receiver = self.mqtt_receiver.lock().await;
            let (publish, ack) = receiver.recv_manual_ack().await?;
            drop(receiver);

            if publish.qos != QoS::AtLeastOnce {
                log::warn!(
                    "[{}] received a request at an unsupported QoS, dropping",
                    self.command_name
                );
                self.ack(ack).await;
                continue;
            }

            let Some(response_topic) = publish.properties.response_topic.clone() else {
                log::warn!("[{}] request missing response topic, dropping", self.command_name);
                self.ack(ack).await;
                continue;
            };
            if !is_valid_replacement(&response_topic) {
                log::warn!("[{}] request has an invalid response topic, dropping", self.command_name);
                self.ack(ack).await;
                continue;
            }

            let Some(correlation_data) = publish.properties.correlation_data.clone() else {
                log::warn!(
                    "[{}] request missing correlation data, dropping",
                    self.command_name
                );
                self.ack(ack).await;
                continue;
            };

            let message_expiry_interval = publish
                .properties
                .message_expiry_interval
                .unwrap_or(DEFAULT_MESSAGE_EXPIRY_INTERVAL_SECONDS);
            if message_expiry_interval == 0 {
                log::warn!("[{}] request already expired on arrival, dropping", self.command_name);
                self.ack(ack).await;
                continue;
            }
            let expiry = Duration::from_secs(u64::from(message_expiry_interval));

            let cache_key =
                CacheKey { response_topic: response_topic.clone(), correlation_data: correlation_data.clone() };

            match self.cache.get(&cache_key) {
                CacheLookupResult::Completed { payload, properties } => {
                    self.publish_raw(response_topic, payload, properties).await;
                    self.ack(ack).await;
                    continue;
                }
                CacheLookupResult::InProgress(_) => {
                    self.ack(ack).await;
                    continue;
                }
                CacheLookupResult::NotFound => {
                    self.cache.begin(cache_key.clone(), CancellationToken::new());
                }
            }

            if correlation_data.len() != 16 {
                self.respond_error(
                    &response_topic,
                    &correlation_data,
                    StatusCode::BadRequest,
                    Some("correlation data must be exactly 16 bytes".to_string()),
                    Some("Correlation Data".to_string()),
                    None,
                )
                .await;
                self.cache.abandon(&cache_key);
                self.ack(ack).await;
                continue;
            }

            if let Some(content_type) = &publish.properties.content_type {
                if content_type != TReq::content_type() {
                    self.respond_error(
                        &response_topic,
                        &correlation_data,
                        StatusCode::UnsupportedMediaType,
                        Some(format!(
                            "content type '{content_type}' is not supported; expected '{}'",
                            TReq::content_type()
                        )),
                        None,
                        None,
                    )
                    .await;
                    self.cache.abandon(&cache_key);
                    self.ack(ack).await;
                    continue;
                }
            }

            let mut protocol_version = DEFAULT_RPC_COMMAND_PROTOCOL_VERSION;
            let mut timestamp: Option<HybridLogicalClock> = None;
            let mut invoker_id: Option<String> = None;
            let mut fencing_token: Option<HybridLogicalClock> = None;
            let mut custom_user_data = Vec::new();
            let mut header_error: Option<(String, String)> = None;

            for (key, value) in &publish.properties.user_properties {
                match UserProperty::from_str(key) {
                    Ok(UserProperty::ProtocolVersion) => match ProtocolVersion::parse_protocol_version(value) {
                        Some(v) => protocol_version = v,
                        None => header_error = Some((UserProperty::ProtocolVersion.to_string(), value.clone())),
                    },
                    Ok(UserProperty::Timestamp) => match HybridLogicalClock::from_str(value) {
                        Ok(hlc) => {
                            if self.application_context.application_hlc.update(&hlc).is_err() {
                                header_error = Some((UserProperty::Timestamp.to_string(), value.clone()));
                            } else {
                                timestamp = Some(hlc);
                            }
                        }
                        Err(_) => header_error = Some((UserProperty::Timestamp.to_string(), value.clone())),
                    },
                    Ok(UserProperty::CommandInvokerId) => invoker_id = Some(value.clone()),
                    Ok(UserProperty::FencingToken) => match HybridLogicalClock::from_str(value) {
                        Ok(hlc) => fencing_token = Some(hlc),
                        Err(_) => header_error = Some((UserProperty::FencingToken.to_string(), value.clone())),
                    },
                    Ok(_) => {
                        log::warn!("[{}] request carried unexpected reserved property '{key}'", self.command_name);
                    }
                    Err(()) if key.starts_with(user_properties::RESERVED_PREFIX) => {
                        log::warn!("[{}] request carried unrecognized reserved property '{key}'", self.command_name);
                    }
                    Err(()) => custom_user_data.push((key.clone(), value.clone())),
                }
            }

            if let Some((name, value)) = header_error {
                self.respond_error(
                    &response_topic,
                    &correlation_data,
                    StatusCode::BadRequest,
                    Some(format!("request header '{name}' has invalid value '{value}'")),
                    Some(name),
                    None,
                )
                .await;
                self.cache.abandon(&cache_key);
                self.ack(ack).await;
                continue;
            }

            if !protocol_version.is_supported(SUPPORTED_RPC_COMMAND_PROTOCOL_VERSIONS) {
                let supported = SUPPORTED_RPC_COMMAND_PROTOCOL_VERSIONS
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.respond_error(
                    &response_topic,
                    &correlation_data,
                    StatusCode::RequestVersionNotSupported,
                    Some(format!("protocol version '{protocol_version}' is not supported")),
                    None,
                    Some((supported, protocol_version.to_string())),
                )
                .await;
                self.cache.abandon(&cache_key);
                self.ack(ack).await;
                continue;
            }

            let payload = match TReq::deserialize(&publish.payload) {
                Ok(payload) => payload,
                Err(_) => {
                    let response_publish = self
                        .respond_error(
                            &response_topic,
                            &correlation_data,
                            StatusCode::BadRequest,
                            Some("failed to deserialize request payload".to_string()),
                            Some("Payload".to_string()),
                            None,
                        )
                        .await;
                    if self.is_idempotent {
                        self.cache.complete(&cache_key, &response_publish, self.cacheable_duration);
                    } else {
                        self.cache.abandon(&cache_key);
                    }
                    self.ack(ack).await;
                    continue;
                }
            };

            let topic_tokens = self.request_topic_pattern.parse_tokens(&publish.topic);

            let (response_tx, response_rx) = oneshot::channel();
            let (completion_tx, completion_rx) = oneshot::channel();

            self.spawn_dispatch_guard(response_topic, correlation_data, expiry, cache_key, response_rx, completion_tx, ack);

            return Some(Request {
                payload,
                custom_user_data,
                timestamp,
                invoker_id,
                fencing_token,
                topic_tokens,
                command_name: self.command_name.clone(),
                response_tx,
                completion_rx,
            });
        }
    }

    /// Drives [`CommandExecutor::recv`] in a loop, spawning `handler` for every request. Runs
    /// until the receiver closes (after [`CommandExecutor::shutdown`]). The handler is
    /// responsible for calling [`Request::complete`] itself; `run` only bounds how many handler
    /// invocations may be in flight at once, via `dispatch_concurrency`.
    pub async fn run<H, Fut>(&self, handler: H)
    where
        H: Fn(Request<TReq, TResp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        while let Some(request) = self.recv().await {
            let permit = self.dispatch_semaphore.clone().acquire_owned().await.ok();
            let handler = handler.clone();
            tokio::task::spawn(async move {
                let _permit = permit;
                handler(request).await;
            });
        }
    }

    async fn ack(&self, ack: Option<Box<dyn MqttAck>>) {
        if let Some(ack) = ack {
            if let Err(e) = ack.ack().await {
                log::error!("[{}] failed to ack request: {e}", self.command_name);
            }
        }
    }

    async fn publish_raw(&self, topic: String, payload: Bytes, properties: PublishProperties) {
        let publish = Publish { topic, payload, qos: QoS::AtLeastOnce, retain: false, properties };
        if let Err(e) = self.mqtt_client.publish(publish).await {
            log::error!("[{}] failed to publish cached response: {e}", self.command_name);
        }
    }

    /// Publishes a protocol-level error response and returns the `Publish` that was sent, so
    /// callers that want the error cached for idempotent replay can pass it to `Cache::complete`.
    async fn respond_error(
        &self,
        response_topic: &str,
        correlation_data: &Bytes,
        status: StatusCode,
        status_message: Option<String>,
        invalid_property_name: Option<String>,
        supported_and_requested_version: Option<(String, String)>,
    ) -> Publish {
        let mut user_properties = vec![(UserProperty::Status.to_string(), (status as u16).to_string())];
        if let Some(message) = status_message {
            user_properties.push((UserProperty::StatusMessage.to_string(), message));
        }
        user_properties.push((UserProperty::IsApplicationError.to_string(), "false".to_string()));
        if let Some(name) = invalid_property_name {
            user_properties.push((UserProperty::InvalidPropertyName.to_string(), name));
        }
        if let Some((supported, requested)) = supported_and_requested_version {
            user_properties.push((UserProperty::SupportedMajorVersions.to_string(), supported));
            user_properties.push((UserProperty::RequestProtocolVersion.to_string(), requested));
        }
        if let Ok(ts) = self.application_context.application_hlc.update_now() {
            user_properties.push((UserProperty::Timestamp.to_string(), ts));
        }

        let publish = Publish {
            topic: response_topic.to_string(),
            payload: Bytes::new(),
            qos: QoS::AtLeastOnce,
            retain: false,
            properties: PublishProperties {
                payload_format_indicator: Some(FormatIndicator::UnspecifiedBytes as u8),
                message_expiry_interval: Some(DEFAULT_MESSAGE_EXPIRY_INTERVAL_SECONDS),
                response_topic: None,
                correlation_data: Some(correlation_data.clone()),
                content_type: None,
                user_properties,
            },
        };
        if let Err(e) = self.mqtt_client.publish(publish.clone()).await {
            log::error!("[{}] failed to publish error response: {e}", self.command_name);
        }
        publish
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_dispatch_guard(
        &self,
        response_topic: String,
        correlation_data: Bytes,
        expiry: Duration,
        cache_key: CacheKey,
        response_rx: oneshot::Receiver<Result<Response<TResp>, AIOProtocolError>>,
        completion_tx: oneshot::Sender<Result<(), AIOProtocolError>>,
        ack: Option<Box<dyn MqttAck>>,
    ) {
        let mqtt_client = self.mqtt_client.clone();
        let application_context = self.application_context.clone();
        let command_name = self.command_name.clone();
        let cache = self.cache.clone();
        let cacheable_duration = self.cacheable_duration;
        let is_idempotent = self.is_idempotent;
        let shutdown_token = self.shutdown_cancellation_token.clone();

        tokio::task::spawn(async move {
            let deadline = tokio::time::Instant::now() + expiry;
            let outcome = tokio::select! {
                () = shutdown_token.cancelled() => None,
                () = tokio::time::sleep_until(deadline) => None,
                result = response_rx => result.ok(),
            };

            if let Some(ack) = ack {
                if let Err(e) = ack.ack().await {
                    log::error!("[{command_name}] failed to ack request: {e}");
                }
            }

            let Some(result) = outcome else {
                log::warn!("[{command_name}] request expired before a response was produced");
                cache.abandon(&cache_key);
                return;
            };

            let custom_user_data = result.as_ref().ok().map(|r| r.custom_user_data.clone()).unwrap_or_default();
            let (payload, content_type, format_indicator, status, message, is_application_error, property_name) =
                match &result {
                    Ok(response) => (
                        response.serialized_payload.clone(),
                        Some(TResp::content_type().to_string()),
                        Some(TResp::format_indicator() as u8),
                        StatusCode::Ok,
                        None,
                        false,
                        None,
                    ),
                    Err(err) => {
                        let status = error_status_code(err);
                        (Vec::new(), None, None, status, err.message.clone(), err.in_application, err.property_name.clone())
                    }
                };

            let mut user_properties = custom_user_data;
            user_properties.push((UserProperty::Status.to_string(), (status as u16).to_string()));
            if let Some(message) = message {
                user_properties.push((UserProperty::StatusMessage.to_string(), message));
            }
            user_properties.push((UserProperty::IsApplicationError.to_string(), is_application_error.to_string()));
            if let Some(name) = property_name {
                user_properties.push((UserProperty::InvalidPropertyName.to_string(), name));
            }
            match application_context.application_hlc.update_now() {
                Ok(ts) => user_properties.push((UserProperty::Timestamp.to_string(), ts)),
                Err(e) => log::error!("[{command_name}] failed to stamp response timestamp: {e}"),
            }

            let properties = PublishProperties {
                payload_format_indicator: format_indicator.or(Some(FormatIndicator::UnspecifiedBytes as u8)),
                message_expiry_interval: Some(DEFAULT_MESSAGE_EXPIRY_INTERVAL_SECONDS),
                response_topic: None,
                correlation_data: Some(correlation_data),
                content_type,
                user_properties,
            };
            let payload = Bytes::from(payload);

            let publish = Publish {
                topic: response_topic,
                payload: payload.clone(),
                qos: QoS::AtLeastOnce,
                retain: false,
                properties: properties.clone(),
            };

            let publish_result = mqtt_client.publish(publish).await.map_err(|e| {
                AIOProtocolError::new_mqtt_error(
                    Some("publish of command response failed".to_string()),
                    Box::new(e),
                    Some(command_name.clone()),
                )
            });

            if publish_result.is_ok() && is_idempotent {
                let replay = Publish { topic: String::new(), payload, qos: QoS::AtLeastOnce, retain: false, properties };
                cache.complete(&cache_key, &replay, cacheable_duration);
            } else {
                cache.abandon(&cache_key);
            }

            let _ = completion_tx.send(publish_result);
        });
    }
}

/// Maps a handler's [`AIOProtocolError`] to the `__stat` status code reported to the invoker.
/// Application-raised errors (`in_application`) keep the handler's own HTTP-style status, when
/// it named a value recognized by [`StatusCode`]; anything else becomes a 500.
fn error_status_code(err: &AIOProtocolError) -> StatusCode {
    if err.kind == AIOProtocolErrorKind::ExecutionException {
        if let Some(code) = err.http_status_code {
            if let Ok(status) = StatusCode::from_str(&code.to_string()) {
                return status;
            }
        }
        return StatusCode::UnprocessableContent;
    }
    StatusCode::InternalError
}

impl<TReq, TResp, C> Drop for CommandExecutor<TReq, TResp, C>
where
    TReq: PayloadSerialize,
    TResp: PayloadSerialize,
    C: ManagedClient,
{
    fn drop(&mut self) {
        self.shutdown_cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationContextOptionsBuilder;
    use crate::common::mqtt::local::LocalBroker;
    use crate::common::payload_serialize::EmptyPayload;

    fn new_context() -> ApplicationContext {
        ApplicationContext::new(ApplicationContextOptionsBuilder::default().node_id("executor-test").build().unwrap())
    }

    #[test]
    fn rejects_empty_command_name() {
        let broker = LocalBroker::new();
        let client = broker.client("executor-1");
        let options = CommandExecutorOptionsBuilder::default()
            .request_topic_pattern("test/{commandName}")
            .command_name(String::new())
            .build()
            .unwrap();
        let err = CommandExecutor::<EmptyPayload, EmptyPayload, _>::new(client, new_context(), options).unwrap_err();
        assert_eq!(err.kind, AIOProtocolErrorKind::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn recv_returns_none_after_shutdown_with_no_requests() {
        let broker = LocalBroker::new();
        let client = broker.client("executor-2");
        let options = CommandExecutorOptionsBuilder::default()
            .request_topic_pattern("test/{commandName}")
            .command_name("increment")
            .build()
            .unwrap();
        let executor = CommandExecutor::<EmptyPayload, EmptyPayload, _>::new(client, new_context(), options).unwrap();
        executor.shutdown().await.unwrap();
        assert!(executor.recv().await.is_none());
    }

    #[tokio::test]
    async fn round_trips_a_successful_command() {
        let broker = LocalBroker::new();
        let executor_client = broker.client("executor-3");
        let invoker_client = broker.client("invoker-3");

        let executor = Arc::new(
            CommandExecutor::<EmptyPayload, EmptyPayload, _>::new(
                executor_client,
                new_context(),
                CommandExecutorOptionsBuilder::default()
                    .request_topic_pattern("test/{commandName}")
                    .command_name("increment")
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        );
        let executor_task = {
            let executor = executor.clone();
            tokio::task::spawn(async move {
                executor
                    .run(|request: Request<EmptyPayload, EmptyPayload>| async move {
                        let response = ResponseBuilder::default().payload(&EmptyPayload).unwrap().build().unwrap();
                        request.complete(Ok(response)).await.unwrap();
                    })
                    .await;
            })
        };

        // give the executor task a chance to subscribe before the invoker publishes.
        tokio::time::sleep(Duration::from_millis(10)).await;

        invoker_client
            .subscribe("clients/invoker-3/test/increment", QoS::AtLeastOnce)
            .await
            .unwrap();
        let mut response_receiver =
            ManagedClient::create_filtered_pub_receiver(&invoker_client, "clients/invoker-3/test/increment");

        invoker_client
            .publish(Publish {
                topic: "test/increment".to_string(),
                payload: Bytes::new(),
                qos: QoS::AtLeastOnce,
                retain: false,
                properties: PublishProperties {
                    payload_format_indicator: Some(0),
                    message_expiry_interval: Some(10),
                    response_topic: Some("clients/invoker-3/test/increment".to_string()),
                    correlation_data: Some(Bytes::copy_from_slice(&[0u8; 16])),
                    content_type: Some(EmptyPayload::content_type().to_string()),
                    user_properties: vec![],
                },
            })
            .await
            .unwrap();

        let (response, _) = tokio::time::timeout(Duration::from_secs(1), response_receiver.recv_manual_ack())
            .await
            .unwrap()
            .unwrap();
        let status = response
            .properties
            .user_properties
            .iter()
            .find(|(k, _)| k == &UserProperty::Status.to_string())
            .map(|(_, v)| v.clone());
        assert_eq!(status, Some((StatusCode::Ok as u16).to_string()));

        executor.shutdown().await.unwrap();
        executor_task.abort();
    }
}
