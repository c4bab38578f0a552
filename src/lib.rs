//! `tether` is a client resilience crate for RPC-style SDKs: retrying
//! unary calls with replay-safety gating, and self-healing topic
//! subscriptions over a pool of stream channels.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tether::prelude::{TopicClient, TopicValue};
//! use tether::{
//!     EventStream, FixedCountPolicy, RequestDescriptor, StreamTransport, SubscribeRequest,
//!     TransportFuture, UnaryResponse, UnaryTransport,
//! };
//!
//! struct MyUnaryTransport;
//!
//! impl UnaryTransport for MyUnaryTransport {
//!     fn send(&self, request: &RequestDescriptor) -> TransportFuture<UnaryResponse> {
//!         let payload = request.payload().clone();
//!         Box::pin(async move {
//!             // Hand the captured call to your wire protocol here.
//!             let _ = payload;
//!             Ok(UnaryResponse::new("ok"))
//!         })
//!     }
//! }
//!
//! struct MyStreamTransport;
//!
//! impl StreamTransport for MyStreamTransport {
//!     fn subscribe(&self, _request: &SubscribeRequest) -> TransportFuture<EventStream> {
//!         Box::pin(async { Ok(Box::pin(futures_util::stream::empty()) as EventStream) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TopicClient::builder()
//!         .client_name("my-sdk")
//!         .unary_transport(Arc::new(MyUnaryTransport))
//!         .stream_transport(Arc::new(MyStreamTransport))
//!         .request_timeout(Duration::from_secs(5))
//!         .retry_delay_policy(Arc::new(FixedCountPolicy::standard().max_attempts(3)))
//!         .try_build()?;
//!
//!     client
//!         .publish("prod", "orders", TopicValue::Text("hello".into()))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Subscription Lifecycle
//!
//! - `subscribe` fails fast only when every channel slot is taken.
//! - A retryable stream failure reconnects from the slot the subscription
//!   already owns, resuming after the last delivered sequence number.
//! - Exactly one of `on_completed` or `on_error` ends the callback
//!   stream; `unsubscribe` always ends in `on_completed`.

mod client;
mod error;
mod executor;
mod method;
mod pool;
mod reconnect;
mod request;
mod response;
mod retry;
mod subscription;
mod transport;
mod util;

pub use crate::client::{TopicClient, TopicClientBuilder};
pub use crate::error::{
    BoxError, RpcClientError, RpcClientErrorCode, StatusCode, TimeoutPhase, TransportErrorKind,
};
pub use crate::executor::{DEFAULT_REQUEST_TIMEOUT, UnaryExecutor};
pub use crate::method::{Idempotency, RpcMethod};
pub use crate::pool::{ChannelPool, DEFAULT_STREAMS_PER_CHANNEL, SlotHandle, StreamChannel};
pub use crate::reconnect::{
    DefaultStreamEligibility, FixedReconnectDelay, ReconnectPolicy, StreamEligibility,
    StreamFailure,
};
pub use crate::request::RequestDescriptor;
pub use crate::response::UnaryResponse;
pub use crate::retry::{
    DelayPolicy, ExponentialBackoffPolicy, FixedCountPolicy, FixedDelayPolicy,
    PermissiveRetryEligibility, RetryDecision, RetryEligibility, StrictRetryEligibility,
    evaluate_retry,
};
pub use crate::subscription::{
    DEFAULT_FIRST_EVENT_TIMEOUT, SubscriptionHandle, SubscriptionObserver,
};
pub use crate::transport::{
    Discontinuity, EventStream, StreamTransport, SubscribeRequest, SubscriptionEvent, TopicItem,
    TopicValue, TransportFuture, UnaryTransport,
};

pub type TetherResult<T> = std::result::Result<T, RpcClientError>;

pub mod prelude {
    pub use crate::{
        DelayPolicy, ExponentialBackoffPolicy, FixedCountPolicy, FixedDelayPolicy, ReconnectPolicy,
        RequestDescriptor, RetryDecision, RetryEligibility, RpcClientError, RpcClientErrorCode,
        RpcMethod, StatusCode, StreamTransport, SubscriptionHandle, SubscriptionObserver,
        TetherResult, TopicClient, TopicClientBuilder, TopicItem, TopicValue, UnaryResponse,
        UnaryTransport,
    };
}
