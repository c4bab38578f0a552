use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, trace, warn};

use crate::error::{RpcClientError, StatusCode, TimeoutPhase};
use crate::pool::SlotHandle;
use crate::reconnect::{ReconnectPolicy, StreamFailure};
use crate::retry::RetryDecision;
use crate::transport::{Discontinuity, SubscribeRequest, SubscriptionEvent, TopicItem};

pub const DEFAULT_FIRST_EVENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Callbacks delivered by a subscription. Exactly one terminal callback
/// fires per subscription, always last: `on_completed` after an
/// unsubscribe or clean close, `on_error` after a terminal failure.
/// Everything runs on the subscription's driver task, so implementations
/// must not block.
pub trait SubscriptionObserver: Send + Sync {
    fn on_item(&self, item: TopicItem);
    fn on_completed(&self);
    fn on_error(&self, error: RpcClientError);

    fn on_discontinuity(&self, _discontinuity: Discontinuity) {}
    fn on_heartbeat(&self) {}
    fn on_connection_lost(&self) {}
    fn on_connection_restored(&self) {}
}

/// Caller-facing handle for a live subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    id: u64,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests teardown. Idempotent; the subscription terminates with
    /// `on_completed`, never with `on_error`, even if the transport
    /// surfaces the local cancellation as a stream failure.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

enum Terminal {
    Completed,
    Failed(RpcClientError),
}

pub(crate) struct SubscriptionDriver {
    request: SubscribeRequest,
    slot: SlotHandle,
    observer: Arc<dyn SubscriptionObserver>,
    reconnect: ReconnectPolicy,
    first_event_timeout: Duration,
    cancel: CancellationToken,
    connection_lost: bool,
    ever_connected: bool,
    reconnect_attempt: u32,
}

impl SubscriptionDriver {
    pub(crate) fn spawn(
        id: u64,
        slot: SlotHandle,
        request: SubscribeRequest,
        observer: Arc<dyn SubscriptionObserver>,
        reconnect: ReconnectPolicy,
        first_event_timeout: Duration,
    ) -> SubscriptionHandle {
        let cancel = CancellationToken::new();
        let span = info_span!(
            "tether.subscription",
            id,
            namespace = %request.namespace,
            topic = %request.topic
        );
        let driver = Self {
            request,
            slot,
            observer,
            reconnect,
            first_event_timeout,
            cancel: cancel.clone(),
            connection_lost: false,
            ever_connected: false,
            reconnect_attempt: 0,
        };
        tokio::spawn(driver.run().instrument(span));
        SubscriptionHandle { id, cancel }
    }

    async fn run(mut self) {
        match self.drive().await {
            Terminal::Completed => {
                debug!("subscription completed");
                self.observer.on_completed();
            }
            Terminal::Failed(error) => {
                warn!(error = %error, "subscription terminated");
                self.observer.on_error(error);
            }
        }
        // The slot is released when the driver drops, freeing channel
        // capacity for new subscriptions.
    }

    async fn drive(&mut self) -> Terminal {
        loop {
            if self.cancel.is_cancelled() {
                return Terminal::Completed;
            }

            let error = match self.connect_and_pump().await {
                Ok(()) => return Terminal::Completed,
                Err(error) => error,
            };

            // An unsubscribe can surface through the transport as a
            // cancelled stream instead of through the token. It still
            // terminates as completed.
            if self.cancel.is_cancelled() {
                if let RpcClientError::Rpc {
                    status: StatusCode::Cancelled,
                    ..
                } = &error
                {
                    return Terminal::Completed;
                }
            }

            if self.ever_connected && !self.connection_lost {
                self.connection_lost = true;
                self.observer.on_connection_lost();
            }

            self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
            let failure = StreamFailure::Error(error);
            match self.reconnect.decide(&failure, self.reconnect_attempt) {
                RetryDecision::Stop => {
                    return match failure {
                        StreamFailure::Error(error) => Terminal::Failed(error),
                        StreamFailure::Unsubscribed => Terminal::Completed,
                    };
                }
                RetryDecision::Delay(delay) => {
                    debug!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = self.reconnect_attempt,
                        error = %failure,
                        "scheduling reconnect"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Terminal::Completed,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Opens one stream at the current resume position and pumps it until
    /// it ends. `Ok(())` means the subscription is done for a completed
    /// reason; `Err` is a stream failure to classify.
    async fn connect_and_pump(&mut self) -> Result<(), RpcClientError> {
        debug!(
            resume_at_sequence = self.request.resume_at_sequence,
            "opening subscription stream"
        );
        let subscribed = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            subscribed = self.slot.transport().subscribe(&self.request) => subscribed,
        };
        let mut events = subscribed?;

        // Handshake: a healthy stream sends a heartbeat before anything
        // else. Anything different is a broken stream.
        let first = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            first = timeout(self.first_event_timeout, events.next()) => first,
        };
        match first {
            Err(_) => {
                return Err(RpcClientError::Timeout {
                    phase: TimeoutPhase::FirstEvent,
                    timeout_ms: self.first_event_timeout.as_millis(),
                });
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(error))) => return Err(error),
            Ok(Some(Ok(SubscriptionEvent::Heartbeat))) => {}
            Ok(Some(Ok(other))) => {
                return Err(RpcClientError::rpc(
                    StatusCode::Internal,
                    format!(
                        "expected heartbeat as first event, got {}",
                        event_kind(&other)
                    ),
                ));
            }
        }
        self.connected();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = events.next() => next,
            };
            match next {
                Some(Ok(SubscriptionEvent::Item(item))) => self.deliver_item(item),
                Some(Ok(SubscriptionEvent::Discontinuity(discontinuity))) => {
                    self.deliver_discontinuity(discontinuity);
                }
                Some(Ok(SubscriptionEvent::Heartbeat)) => {
                    trace!("heartbeat");
                    self.observer.on_heartbeat();
                }
                Some(Ok(SubscriptionEvent::Unknown)) => {
                    warn!("ignoring unrecognized subscription event");
                }
                Some(Err(error)) => return Err(error),
                None => return Ok(()),
            }
        }
    }

    fn connected(&mut self) {
        self.ever_connected = true;
        // Attempts count consecutive failures, not lifetime failures.
        self.reconnect_attempt = 0;
        if self.connection_lost {
            self.connection_lost = false;
            debug!("subscription connection restored");
            self.observer.on_connection_restored();
        }
    }

    fn deliver_item(&mut self, item: TopicItem) {
        self.request.resume_at_sequence = item.sequence.saturating_add(1);
        self.request.resume_at_page = item.page;
        trace!(sequence = item.sequence, "delivering item");
        self.observer.on_item(item);
    }

    fn deliver_discontinuity(&mut self, discontinuity: Discontinuity) {
        self.request.resume_at_sequence = discontinuity.new_sequence.saturating_add(1);
        self.request.resume_at_page = discontinuity.new_page;
        debug!(
            last_sequence = discontinuity.last_sequence,
            new_sequence = discontinuity.new_sequence,
            "delivering discontinuity"
        );
        self.observer.on_discontinuity(discontinuity);
    }
}

fn event_kind(event: &SubscriptionEvent) -> &'static str {
    match event {
        SubscriptionEvent::Item(_) => "item",
        SubscriptionEvent::Discontinuity(_) => "discontinuity",
        SubscriptionEvent::Heartbeat => "heartbeat",
        SubscriptionEvent::Unknown => "unknown",
    }
}
