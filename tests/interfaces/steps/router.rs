//! Router interface step definitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cucumber::{given, then, when, World};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use switchyard::handler::sink_fn;
use switchyard::message::Message;
use switchyard::middleware::{DeadLetterQueue, Retry, RetryPolicy};
use switchyard::pubsub::{ChannelPubSub, MessageStream};
use switchyard::router::{Router, RouterError};
use switchyard::test_utils::{counting_handler, failing_handler, flaky_handler};

/// Test context for router scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct RouterWorld {
    pubsub: Arc<ChannelPubSub>,
    router: Option<Router>,
    streams: HashMap<String, MessageStream>,
    handler_calls: Arc<AtomicUsize>,
    last_received: Option<Message>,
    stop: Option<oneshot::Sender<()>>,
    run_handle: Option<JoinHandle<switchyard::router::Result<()>>>,
    run_result: Option<switchyard::router::Result<()>>,
}

impl std::fmt::Debug for RouterWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterWorld")
            .field("router_built", &self.router.is_some())
            .field("watched", &self.streams.keys().collect::<Vec<_>>())
            .field("handler_calls", &self.handler_calls.load(Ordering::SeqCst))
            .field("run_result", &self.run_result)
            .finish()
    }
}

impl RouterWorld {
    fn new() -> Self {
        Self {
            pubsub: Arc::new(ChannelPubSub::default()),
            router: Some(Router::default()),
            streams: HashMap::new(),
            handler_calls: Arc::new(AtomicUsize::new(0)),
            last_received: None,
            stop: None,
            run_handle: None,
            run_result: None,
        }
    }
}

async fn next_message(stream: &mut MessageStream) -> Message {
    timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Timed out waiting for a message")
        .expect("Stream ended unexpectedly")
}

// ==========================================================================
// Setup
// ==========================================================================

#[given("a router over a channel pub/sub")]
async fn given_router(_world: &mut RouterWorld) {
    // Router and pub/sub are initialized via World::new
}

#[given(expr = "an echo handler named {string} from {string} to {string}")]
async fn given_echo_handler(world: &mut RouterWorld, name: String, input: String, output: String) {
    let (handler, calls) = counting_handler();
    world.handler_calls = calls;
    let router = world.router.as_mut().expect("Router already running");
    router
        .add_handler(
            name,
            input,
            world.pubsub.clone(),
            output,
            world.pubsub.clone(),
            handler,
        )
        .expect("Failed to register handler");
}

#[given(expr = "a handler named {string} from {string} to {string} that always fails with {string}")]
async fn given_failing_handler(
    world: &mut RouterWorld,
    name: String,
    input: String,
    output: String,
    reason: String,
) {
    let (handler, calls) = failing_handler(&reason);
    world.handler_calls = calls;
    let router = world.router.as_mut().expect("Router already running");
    router
        .add_handler(
            name,
            input,
            world.pubsub.clone(),
            output,
            world.pubsub.clone(),
            handler,
        )
        .expect("Failed to register handler");
}

#[given(expr = "a handler named {string} from {string} to {string} that fails {int} times then succeeds")]
async fn given_flaky_handler(
    world: &mut RouterWorld,
    name: String,
    input: String,
    output: String,
    failures: usize,
) {
    let (handler, calls) = flaky_handler(failures);
    world.handler_calls = calls;
    let router = world.router.as_mut().expect("Router already running");
    router
        .add_handler(
            name,
            input,
            world.pubsub.clone(),
            output,
            world.pubsub.clone(),
            handler,
        )
        .expect("Failed to register handler");
}

#[given(expr = "a sink handler named {string} on {string}")]
async fn given_sink_handler(world: &mut RouterWorld, name: String, input: String) {
    let calls = Arc::new(AtomicUsize::new(0));
    world.handler_calls = calls.clone();
    let sink = sink_fn(move |_message: Message| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(()) }
    });
    let router = world.router.as_mut().expect("Router already running");
    router
        .add_no_publisher_handler(name, input, world.pubsub.clone(), sink)
        .expect("Failed to register sink handler");
}

#[given(expr = "retry middleware with {int} retries and {int} ms initial interval")]
async fn given_retry_middleware(world: &mut RouterWorld, retries: usize, initial_ms: u64) {
    let policy = RetryPolicy {
        max_retries: retries,
        initial_interval: Duration::from_millis(initial_ms),
        max_interval: Duration::from_secs(1),
        multiplier: 2.0,
        max_elapsed_time: None,
        jitter: false,
    };
    let retry = Retry::new(policy).expect("Invalid retry policy");
    world
        .router
        .as_mut()
        .expect("Router already running")
        .add_middleware(Arc::new(retry));
}

#[given(expr = "dead-letter middleware targeting {string}")]
async fn given_dead_letter_middleware(world: &mut RouterWorld, topic: String) {
    let dlq = DeadLetterQueue::new(world.pubsub.clone(), topic).expect("Invalid dead-letter topic");
    world
        .router
        .as_mut()
        .expect("Router already running")
        .add_middleware(Arc::new(dlq));
}

#[given(expr = "a watcher on {string}")]
async fn given_watcher(world: &mut RouterWorld, topic: String) {
    let stream = world
        .pubsub
        .subscribe(&topic)
        .await
        .expect("Subscribe failed");
    world.streams.insert(topic, stream);
}

// ==========================================================================
// Actions
// ==========================================================================

#[when("the router starts")]
async fn when_router_starts(world: &mut RouterWorld) {
    let router = world.router.take().expect("Router already running");
    let ready = router.ready();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    world.stop = Some(stop_tx);
    world.run_handle = Some(tokio::spawn(router.run(async move {
        let _ = stop_rx.await;
    })));
    ready.await;
}

#[when(expr = "I publish {string} to {string}")]
async fn when_publish(world: &mut RouterWorld, payload: String, topic: String) {
    world
        .pubsub
        .publish(&topic, Message::new(payload))
        .await
        .expect("Publish failed");
}

#[when("the router is stopped")]
async fn when_router_stopped(world: &mut RouterWorld) {
    let stop = world.stop.take().expect("Router not running");
    let _ = stop.send(());
    let handle = world.run_handle.take().expect("Router not running");
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("Router did not stop in time")
        .expect("Router task panicked");
    world.run_result = Some(result);
}

// ==========================================================================
// Assertions
// ==========================================================================

#[then(expr = "topic {string} receives a message with payload {string}")]
async fn then_topic_receives(world: &mut RouterWorld, topic: String, expected: String) {
    let stream = world.streams.get_mut(&topic).expect("No watcher on topic");
    let message = next_message(stream).await;
    assert_eq!(message.payload_str(), expected, "Payload should match");
    world.last_received = Some(message);
}

#[then(expr = "topic {string} receives nothing")]
async fn then_topic_silent(world: &mut RouterWorld, topic: String) {
    let stream = world.streams.get_mut(&topic).expect("No watcher on topic");
    let outcome = timeout(Duration::from_millis(100), stream.next()).await;
    assert!(outcome.is_err(), "Expected no message on '{}'", topic);
}

#[then(expr = "the received message has metadata {string} set to {string}")]
async fn then_received_metadata(world: &mut RouterWorld, key: String, value: String) {
    let message = world
        .last_received
        .as_ref()
        .expect("No message received yet");
    assert_eq!(
        message.metadata.get(&key),
        Some(&value),
        "Metadata '{}' should be '{}'",
        key,
        value
    );
}

#[then(expr = "the handler ran {int} time(s)")]
async fn then_handler_ran(world: &mut RouterWorld, expected: usize) {
    // Handlers run on worker tasks; give the count a moment to settle
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let actual = world.handler_calls.load(Ordering::SeqCst);
        if actual >= expected || tokio::time::Instant::now() >= deadline {
            assert_eq!(actual, expected, "Handler invocation count should match");
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[then("the router stops cleanly")]
async fn then_router_stops_cleanly(world: &mut RouterWorld) {
    match world.run_result.as_ref().expect("Router was not stopped") {
        Ok(()) => {}
        Err(err) => panic!("Router returned an error: {err}"),
    }
}

#[then(expr = "registering another echo handler named {string} from {string} to {string} is rejected")]
async fn then_duplicate_rejected(
    world: &mut RouterWorld,
    name: String,
    input: String,
    output: String,
) {
    let (handler, _) = counting_handler();
    let router = world.router.as_mut().expect("Router already running");
    let err = router
        .add_handler(
            name,
            input,
            world.pubsub.clone(),
            output,
            world.pubsub.clone(),
            handler,
        )
        .expect_err("Duplicate registration should fail");
    assert!(
        matches!(err, RouterError::DuplicateHandler { .. }),
        "Expected a duplicate handler error, got {err:?}"
    );
}
