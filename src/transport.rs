use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

use crate::error::RpcClientError;
use crate::request::RequestDescriptor;
use crate::response::UnaryResponse;

pub type TransportFuture<T> = Pin<Box<dyn Future<Output = Result<T, RpcClientError>> + Send>>;

/// Ordered stream of subscription events as delivered by a stream transport.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SubscriptionEvent, RpcClientError>> + Send>>;

/// One logical connection capable of carrying unary calls.
///
/// Implementations own the wire protocol. They receive the captured
/// descriptor by reference and must not assume it is called only once:
/// the same descriptor is replayed verbatim on every retry attempt.
pub trait UnaryTransport: Send + Sync {
    fn send(&self, request: &RequestDescriptor) -> TransportFuture<UnaryResponse>;
}

/// One logical connection capable of opening subscription streams.
///
/// Each call opens a fresh stream starting at the resume position carried
/// in the request. The first event on a healthy stream is a heartbeat.
pub trait StreamTransport: Send + Sync {
    fn subscribe(&self, request: &SubscribeRequest) -> TransportFuture<EventStream>;
}

#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub namespace: String,
    pub topic: String,
    /// Sequence number of the next item the caller expects.
    pub resume_at_sequence: u64,
    pub resume_at_page: u64,
}

impl SubscribeRequest {
    pub fn new(namespace: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            topic: topic.into(),
            resume_at_sequence: 0,
            resume_at_page: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    Item(TopicItem),
    Discontinuity(Discontinuity),
    Heartbeat,
    /// Event kind the transport did not recognize. Logged and skipped
    /// without advancing the resume position.
    Unknown,
}

#[derive(Clone, Debug)]
pub struct TopicItem {
    pub sequence: u64,
    pub page: u64,
    pub value: TopicValue,
    pub publisher_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Discontinuity {
    pub last_sequence: u64,
    pub new_sequence: u64,
    pub new_page: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicValue {
    Text(String),
    Binary(Bytes),
}

impl TopicValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}
