use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;

use tether::prelude::{
    ReconnectPolicy, RpcClientError, StatusCode, StreamTransport, SubscriptionObserver,
    TopicClient, TopicItem, TopicValue, UnaryResponse, UnaryTransport,
};
use tether::{
    Discontinuity, EventStream, FixedReconnectDelay, RequestDescriptor, SubscribeRequest,
    SubscriptionEvent, TransportFuture,
};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One scripted (re)connect attempt: either the subscribe call itself is
/// refused, or it yields a stream of events, optionally hanging open after
/// the scripted events instead of closing cleanly.
enum ConnectionPlan {
    Refused(RpcClientError),
    Stream {
        events: Vec<Result<SubscriptionEvent, RpcClientError>>,
        hang_after: bool,
    },
}

impl ConnectionPlan {
    fn stream(events: Vec<Result<SubscriptionEvent, RpcClientError>>) -> Self {
        Self::Stream {
            events,
            hang_after: false,
        }
    }

    fn hanging(events: Vec<Result<SubscriptionEvent, RpcClientError>>) -> Self {
        Self::Stream {
            events,
            hang_after: true,
        }
    }
}

struct ScriptedStreamTransport {
    plans: Mutex<VecDeque<ConnectionPlan>>,
    requests: Mutex<Vec<SubscribeRequest>>,
}

impl ScriptedStreamTransport {
    fn new(plans: Vec<ConnectionPlan>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn subscribe_calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    fn recorded_requests(&self) -> Vec<SubscribeRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

impl StreamTransport for ScriptedStreamTransport {
    fn subscribe(&self, request: &SubscribeRequest) -> TransportFuture<EventStream> {
        lock_unpoisoned(&self.requests).push(request.clone());
        let plan = lock_unpoisoned(&self.plans)
            .pop_front()
            .unwrap_or(ConnectionPlan::hanging(vec![Ok(SubscriptionEvent::Heartbeat)]));
        Box::pin(async move {
            match plan {
                ConnectionPlan::Refused(error) => Err(error),
                ConnectionPlan::Stream { events, hang_after } => {
                    let scripted = stream::iter(events);
                    let events: EventStream = if hang_after {
                        Box::pin(scripted.chain(stream::pending()))
                    } else {
                        Box::pin(scripted)
                    };
                    Ok(events)
                }
            }
        })
    }
}

struct NullUnaryTransport;

impl UnaryTransport for NullUnaryTransport {
    fn send(&self, _request: &RequestDescriptor) -> TransportFuture<UnaryResponse> {
        Box::pin(async { Ok(UnaryResponse::new("ok")) })
    }
}

#[derive(Default)]
struct RecordingObserver {
    items: Mutex<Vec<TopicItem>>,
    discontinuities: Mutex<Vec<Discontinuity>>,
    errors: Mutex<Vec<RpcClientError>>,
    completed: AtomicUsize,
    heartbeats: AtomicUsize,
    connection_lost: AtomicUsize,
    connection_restored: AtomicUsize,
}

impl RecordingObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn item_sequences(&self) -> Vec<u64> {
        lock_unpoisoned(&self.items)
            .iter()
            .map(|item| item.sequence)
            .collect()
    }

    fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn error_count(&self) -> usize {
        lock_unpoisoned(&self.errors).len()
    }

    fn terminal_count(&self) -> usize {
        self.completed_count() + self.error_count()
    }
}

impl SubscriptionObserver for RecordingObserver {
    fn on_item(&self, item: TopicItem) {
        lock_unpoisoned(&self.items).push(item);
    }

    fn on_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: RpcClientError) {
        lock_unpoisoned(&self.errors).push(error);
    }

    fn on_discontinuity(&self, discontinuity: Discontinuity) {
        lock_unpoisoned(&self.discontinuities).push(discontinuity);
    }

    fn on_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_lost(&self) {
        self.connection_lost.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_restored(&self) {
        self.connection_restored.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls until `condition` holds or two seconds pass.
async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::standard()
        .delay_policy(Arc::new(FixedReconnectDelay::standard().delay(Duration::from_millis(1))))
}

fn client_over(
    transport: Arc<ScriptedStreamTransport>,
    streams_per_channel: usize,
    reconnect: ReconnectPolicy,
) -> TopicClient {
    TopicClient::builder()
        .unary_transport(Arc::new(NullUnaryTransport))
        .stream_transport(transport)
        .streams_per_channel(streams_per_channel)
        .reconnect_policy(reconnect)
        .build()
}

fn item(sequence: u64) -> Result<SubscriptionEvent, RpcClientError> {
    Ok(SubscriptionEvent::Item(TopicItem {
        sequence,
        page: 0,
        value: TopicValue::Text(format!("message-{sequence}")),
        publisher_id: None,
    }))
}

fn heartbeat() -> Result<SubscriptionEvent, RpcClientError> {
    Ok(SubscriptionEvent::Heartbeat)
}

fn stream_error(status: StatusCode) -> Result<SubscriptionEvent, RpcClientError> {
    Err(RpcClientError::rpc(status, "stream broke"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn items_arrive_in_order_and_a_clean_close_completes_once() {
    let transport = ScriptedStreamTransport::new(vec![ConnectionPlan::stream(vec![
        heartbeat(),
        item(1),
        item(2),
        item(3),
    ])]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    let handle = client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(observer.item_sequences(), vec![1, 2, 3]);
    assert_eq!(observer.completed_count(), 1);
    assert_eq!(observer.error_count(), 0);
    assert_eq!(transport.subscribe_calls(), 1);
    assert!(!handle.is_unsubscribed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_full_pool_rejects_the_next_subscribe_synchronously() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::hanging(vec![heartbeat()]),
        ConnectionPlan::hanging(vec![heartbeat()]),
    ]);
    let client = client_over(transport.clone(), 2, fast_reconnect());

    let _first = client
        .subscribe("prod", "orders", RecordingObserver::new())
        .expect("first slot");
    let _second = client
        .subscribe("prod", "orders", RecordingObserver::new())
        .expect("second slot");

    match client.subscribe("prod", "orders", RecordingObserver::new()) {
        Err(RpcClientError::PoolExhausted {
            channels,
            capacity_per_channel,
        }) => {
            assert_eq!(channels, 1);
            assert_eq!(capacity_per_channel, 2);
        }
        other => panic!("unexpected subscribe outcome: {:?}", other.map(|handle| handle.id())),
    }
    assert_eq!(client.active_subscriptions(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribing_frees_the_slot_for_the_next_subscriber() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::hanging(vec![heartbeat()]),
        ConnectionPlan::hanging(vec![heartbeat()]),
    ]);
    let client = client_over(transport.clone(), 1, fast_reconnect());
    let observer = RecordingObserver::new();

    let handle = client
        .subscribe("prod", "orders", observer.clone())
        .expect("only slot");
    assert!(client.subscribe("prod", "orders", RecordingObserver::new()).is_err());

    handle.unsubscribe();
    wait_until(|| observer.completed_count() == 1).await;
    wait_until(|| client.active_subscriptions() == 0).await;

    client
        .subscribe("prod", "orders", RecordingObserver::new())
        .expect("freed slot is immediately reusable");
    assert_eq!(client.active_subscriptions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_permission_denied_stream_failure_terminates_with_exactly_one_error() {
    let transport = ScriptedStreamTransport::new(vec![ConnectionPlan::stream(vec![
        heartbeat(),
        stream_error(StatusCode::PermissionDenied),
    ])]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(observer.error_count(), 1);
    assert_eq!(observer.completed_count(), 0);
    assert_eq!(transport.subscribe_calls(), 1, "terminal failures never reconnect");
    let errors = lock_unpoisoned(&observer.errors);
    match &errors[0] {
        RpcClientError::Rpc { status, .. } => assert_eq!(*status, StatusCode::PermissionDenied),
        other => panic!("unexpected terminal error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_transient_failure_reconnects_on_the_same_slot_and_resumes() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::stream(vec![heartbeat(), item(4), stream_error(StatusCode::Unavailable)]),
        ConnectionPlan::stream(vec![heartbeat(), item(5)]),
    ]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(observer.item_sequences(), vec![4, 5]);
    assert_eq!(observer.completed_count(), 1);
    assert_eq!(observer.error_count(), 0);
    assert_eq!(observer.connection_lost.load(Ordering::SeqCst), 1);
    assert_eq!(observer.connection_restored.load(Ordering::SeqCst), 1);

    let requests = transport.recorded_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].resume_at_sequence, 0);
    assert_eq!(requests[1].resume_at_sequence, 5, "resume after the last delivered item");
    wait_until(|| client.active_subscriptions() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribing_while_a_reconnect_is_pending_completes_without_another_attempt() {
    let transport = ScriptedStreamTransport::new(vec![ConnectionPlan::stream(vec![
        heartbeat(),
        stream_error(StatusCode::Unavailable),
    ])]);
    let slow_reconnect = ReconnectPolicy::standard()
        .delay_policy(Arc::new(FixedReconnectDelay::standard().delay(Duration::from_secs(30))));
    let client = client_over(transport.clone(), 10, slow_reconnect);
    let observer = RecordingObserver::new();

    let handle = client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.connection_lost.load(Ordering::SeqCst) == 1).await;

    handle.unsubscribe();
    wait_until(|| observer.terminal_count() > 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(observer.completed_count(), 1);
    assert_eq!(observer.error_count(), 0);
    assert_eq!(transport.subscribe_calls(), 1, "the pending reconnect must never fire");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_non_heartbeat_first_event_is_treated_as_a_broken_connection() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::stream(vec![item(1)]),
        ConnectionPlan::stream(vec![heartbeat(), item(2)]),
    ]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(transport.subscribe_calls(), 2);
    assert_eq!(
        observer.item_sequences(),
        vec![2],
        "nothing from the broken handshake may reach the caller"
    );
    assert_eq!(observer.completed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_silent_connection_times_out_and_reconnects() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::hanging(vec![]),
        ConnectionPlan::stream(vec![heartbeat(), item(1)]),
    ]);
    let client = TopicClient::builder()
        .unary_transport(Arc::new(NullUnaryTransport))
        .stream_transport(transport.clone())
        .streams_per_channel(10)
        .reconnect_policy(fast_reconnect())
        .first_event_timeout(Duration::from_millis(50))
        .build();
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(transport.subscribe_calls(), 2);
    assert_eq!(observer.item_sequences(), vec![1]);
    assert_eq!(observer.completed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_refused_subscribe_with_a_terminal_status_errors_from_initiating() {
    let transport = ScriptedStreamTransport::new(vec![ConnectionPlan::Refused(
        RpcClientError::rpc(StatusCode::NotFound, "no such topic"),
    )]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "missing", observer.clone())
        .expect("the slot itself is available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(observer.error_count(), 1);
    assert_eq!(observer.completed_count(), 0);
    assert_eq!(transport.subscribe_calls(), 1);
    wait_until(|| client.active_subscriptions() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_refused_subscribe_with_a_transient_status_retries_the_connect() {
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::Refused(RpcClientError::rpc(StatusCode::Unavailable, "starting up")),
        ConnectionPlan::stream(vec![heartbeat(), item(1)]),
    ]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(transport.subscribe_calls(), 2);
    assert_eq!(observer.item_sequences(), vec![1]);
    assert_eq!(observer.completed_count(), 1);
    assert_eq!(observer.error_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_event_kinds_are_skipped_without_terminating() {
    let transport = ScriptedStreamTransport::new(vec![ConnectionPlan::stream(vec![
        heartbeat(),
        Ok(SubscriptionEvent::Unknown),
        item(1),
        heartbeat(),
        item(2),
    ])]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(observer.item_sequences(), vec![1, 2]);
    assert_eq!(observer.heartbeats.load(Ordering::SeqCst), 1, "mid-stream heartbeat only");
    assert_eq!(observer.completed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_discontinuity_overwrites_the_resume_position() {
    let discontinuity = Discontinuity {
        last_sequence: 3,
        new_sequence: 9,
        new_page: 2,
    };
    let transport = ScriptedStreamTransport::new(vec![
        ConnectionPlan::stream(vec![
            heartbeat(),
            Ok(SubscriptionEvent::Discontinuity(discontinuity)),
            stream_error(StatusCode::Unavailable),
        ]),
        ConnectionPlan::stream(vec![heartbeat()]),
    ]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    wait_until(|| observer.terminal_count() > 0).await;

    assert_eq!(lock_unpoisoned(&observer.discontinuities).as_slice(), &[discontinuity]);
    let requests = transport.recorded_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].resume_at_sequence, 10);
    assert_eq!(requests[1].resume_at_page, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_and_subscribe_share_one_client() {
    let transport =
        ScriptedStreamTransport::new(vec![ConnectionPlan::stream(vec![heartbeat(), item(1)])]);
    let client = client_over(transport.clone(), 10, fast_reconnect());
    let observer = RecordingObserver::new();

    client
        .subscribe("prod", "orders", observer.clone())
        .expect("slot available");
    client
        .publish("prod", "orders", TopicValue::Text("hello".to_owned()))
        .await
        .expect("publish goes through the unary path");

    wait_until(|| observer.terminal_count() > 0).await;
    assert_eq!(observer.item_sequences(), vec![1]);
}
