use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderValue;
use http::header::HeaderName;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::TetherResult;
use crate::error::RpcClientError;
use crate::executor::{DEFAULT_REQUEST_TIMEOUT, UnaryExecutor};
use crate::method::RpcMethod;
use crate::pool::{ChannelPool, DEFAULT_STREAMS_PER_CHANNEL};
use crate::reconnect::ReconnectPolicy;
use crate::request::RequestDescriptor;
use crate::response::UnaryResponse;
use crate::retry::{
    DelayPolicy, FixedCountPolicy, PermissiveRetryEligibility, RetryEligibility,
    StrictRetryEligibility,
};
use crate::subscription::{
    DEFAULT_FIRST_EVENT_TIMEOUT, SubscriptionDriver, SubscriptionHandle, SubscriptionObserver,
};
use crate::transport::{StreamTransport, SubscribeRequest, TopicValue, UnaryTransport};

const DEFAULT_CLIENT_NAME: &str = "tether";

const NAMESPACE_METADATA_KEY: HeaderName = HeaderName::from_static("namespace");
const TOPIC_METADATA_KEY: HeaderName = HeaderName::from_static("topic");
const VALUE_KIND_METADATA_KEY: HeaderName = HeaderName::from_static("value-kind");

pub struct TopicClientBuilder {
    client_name: String,
    unary_transports: Vec<Arc<dyn UnaryTransport>>,
    stream_transports: Vec<Arc<dyn StreamTransport>>,
    streams_per_channel: usize,
    retry_eligibility: Arc<dyn RetryEligibility>,
    retry_delay_policy: Arc<dyn DelayPolicy>,
    reconnect: ReconnectPolicy,
    request_timeout: Duration,
    first_event_timeout: Duration,
}

impl TopicClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            unary_transports: Vec::new(),
            stream_transports: Vec::new(),
            streams_per_channel: DEFAULT_STREAMS_PER_CHANNEL,
            retry_eligibility: Arc::new(StrictRetryEligibility::standard()),
            retry_delay_policy: Arc::new(FixedCountPolicy::standard()),
            reconnect: ReconnectPolicy::standard(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            first_event_timeout: DEFAULT_FIRST_EVENT_TIMEOUT,
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn unary_transport(mut self, transport: Arc<dyn UnaryTransport>) -> Self {
        self.unary_transports.push(transport);
        self
    }

    pub fn stream_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.stream_transports.push(transport);
        self
    }

    pub fn streams_per_channel(mut self, streams_per_channel: usize) -> Self {
        self.streams_per_channel = streams_per_channel.max(1);
        self
    }

    pub fn retry_eligibility(mut self, retry_eligibility: Arc<dyn RetryEligibility>) -> Self {
        self.retry_eligibility = retry_eligibility;
        self
    }

    pub fn retry_delay_policy(mut self, retry_delay_policy: Arc<dyn DelayPolicy>) -> Self {
        self.retry_delay_policy = retry_delay_policy;
        self
    }

    pub fn allow_non_idempotent_retries(mut self, allow: bool) -> Self {
        self.retry_eligibility = if allow {
            Arc::new(PermissiveRetryEligibility::standard())
        } else {
            Arc::new(StrictRetryEligibility::standard())
        };
        self
    }

    pub fn reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn first_event_timeout(mut self, first_event_timeout: Duration) -> Self {
        self.first_event_timeout = first_event_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn try_build(self) -> TetherResult<TopicClient> {
        if self.unary_transports.is_empty() {
            return Err(RpcClientError::InvalidConfiguration {
                message: "at least one unary transport is required".to_owned(),
            });
        }
        if self.stream_transports.is_empty() {
            return Err(RpcClientError::InvalidConfiguration {
                message: "at least one stream transport is required".to_owned(),
            });
        }

        let executor = UnaryExecutor::new(self.unary_transports)
            .client_name(self.client_name.clone())
            .eligibility(self.retry_eligibility)
            .delay_policy(self.retry_delay_policy)
            .request_timeout(self.request_timeout);
        let pool = ChannelPool::new(self.stream_transports, self.streams_per_channel);

        Ok(TopicClient {
            client_name: self.client_name,
            executor,
            pool,
            reconnect: self.reconnect,
            first_event_timeout: self.first_event_timeout,
            next_subscription_id: AtomicU64::new(0),
        })
    }

    pub fn build(self) -> TopicClient {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build tether topic client: {error}"))
    }
}

impl Default for TopicClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish/subscribe client over caller-supplied transports.
///
/// Unary calls rotate across the unary transports and retry per the
/// configured policies. Subscriptions claim a slot on a stream channel
/// up front and keep it, across reconnects, until they terminate.
pub struct TopicClient {
    client_name: String,
    executor: UnaryExecutor,
    pool: ChannelPool,
    reconnect: ReconnectPolicy,
    first_event_timeout: Duration,
    next_subscription_id: AtomicU64,
}

impl TopicClient {
    pub fn builder() -> TopicClientBuilder {
        TopicClientBuilder::new()
    }

    /// Publishes one value to a topic. Publishes are not replay safe and
    /// are therefore not retried under the default eligibility.
    pub async fn publish(
        &self,
        namespace: &str,
        topic: &str,
        value: TopicValue,
    ) -> TetherResult<()> {
        let namespace_value = HeaderValue::from_str(namespace).map_err(|source| {
            RpcClientError::InvalidMetadataValue {
                name: NAMESPACE_METADATA_KEY.as_str().to_owned(),
                source,
            }
        })?;
        let topic_value =
            HeaderValue::from_str(topic).map_err(|source| RpcClientError::InvalidMetadataValue {
                name: TOPIC_METADATA_KEY.as_str().to_owned(),
                source,
            })?;
        let kind = match &value {
            TopicValue::Text(_) => HeaderValue::from_static("text"),
            TopicValue::Binary(_) => HeaderValue::from_static("binary"),
        };
        let payload = match value {
            TopicValue::Text(text) => Bytes::from(text),
            TopicValue::Binary(bytes) => bytes,
        };
        let request = RequestDescriptor::new(RpcMethod::TopicPublish, payload)
            .metadata_entry(NAMESPACE_METADATA_KEY, namespace_value)
            .metadata_entry(TOPIC_METADATA_KEY, topic_value)
            .metadata_entry(VALUE_KIND_METADATA_KEY, kind);

        let span = info_span!(
            "tether.publish",
            client = %self.client_name,
            namespace = %namespace,
            topic = %topic
        );
        async {
            debug!(payload_bytes = request.payload().len(), "publishing value");
            self.executor.execute(&request).await.map(|_| ())
        }
        .instrument(span)
        .await
    }

    /// Starts a subscription and returns its handle. Fails immediately
    /// with `PoolExhausted` when every channel slot is taken; all later
    /// outcomes, including connection failures, arrive through the
    /// observer. Must be called from within a Tokio runtime.
    pub fn subscribe(
        &self,
        namespace: impl Into<String>,
        topic: impl Into<String>,
        observer: Arc<dyn SubscriptionObserver>,
    ) -> TetherResult<SubscriptionHandle> {
        let namespace = namespace.into();
        let topic = topic.into();
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            "tether.subscribe",
            client = %self.client_name,
            id,
            namespace = %namespace,
            topic = %topic
        );
        let _enter = span.enter();

        let slot = self.pool.allocate(id)?;
        debug!(channel = slot.channel_index(), "subscription slot reserved");
        let request = SubscribeRequest::new(namespace, topic);
        Ok(SubscriptionDriver::spawn(
            id,
            slot,
            request,
            observer,
            self.reconnect.clone(),
            self.first_event_timeout,
        ))
    }

    /// Runs one unary call through the retry loop.
    pub async fn execute(&self, request: &RequestDescriptor) -> TetherResult<UnaryResponse> {
        self.executor.execute(request).await
    }

    pub async fn execute_with_cancellation(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> TetherResult<UnaryResponse> {
        self.executor
            .execute_with_cancellation(request, cancel)
            .await
    }

    pub fn subscription_capacity(&self) -> usize {
        self.pool.total_capacity()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.pool.occupancy()
    }
}
