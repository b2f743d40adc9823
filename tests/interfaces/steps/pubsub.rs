//! Channel pub/sub interface step definitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cucumber::{given, then, when, World};
use futures::StreamExt;
use tokio::time::timeout;

use switchyard::message::Message;
use switchyard::pubsub::{ChannelPubSub, MessageStream, PubSubError};

/// Test context for pub/sub scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct PubSubWorld {
    pubsub: Arc<ChannelPubSub>,
    streams: HashMap<String, MessageStream>,
    last_received: Option<Message>,
    publish_result: Option<switchyard::pubsub::Result<()>>,
    subscribe_error: Option<PubSubError>,
}

impl std::fmt::Debug for PubSubWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubWorld")
            .field("subscriptions", &self.streams.keys().collect::<Vec<_>>())
            .field("last_received", &self.last_received)
            .field("publish_result", &self.publish_result)
            .field("subscribe_error", &self.subscribe_error)
            .finish()
    }
}

impl PubSubWorld {
    fn new() -> Self {
        Self {
            pubsub: Arc::new(ChannelPubSub::default()),
            streams: HashMap::new(),
            last_received: None,
            publish_result: None,
            subscribe_error: None,
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

#[given("a channel pub/sub")]
async fn given_channel_pubsub(world: &mut PubSubWorld) {
    world.pubsub = Arc::new(ChannelPubSub::default());
}

#[given("a persistent channel pub/sub")]
async fn given_persistent_pubsub(world: &mut PubSubWorld) {
    world.pubsub = Arc::new(ChannelPubSub::persistent());
}

#[given(expr = "a subscriber on {string}")]
async fn given_subscriber(world: &mut PubSubWorld, topic: String) {
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

#[when(expr = "I subscribe to {string}")]
async fn when_subscribe(world: &mut PubSubWorld, topic: String) {
    match world.pubsub.subscribe(&topic).await {
        Ok(stream) => {
            world.streams.insert(topic, stream);
        }
        Err(err) => world.subscribe_error = Some(err),
    }
}

#[when(expr = "I publish {string} to {string}")]
async fn when_publish(world: &mut PubSubWorld, payload: String, topic: String) {
    world.publish_result = Some(world.pubsub.publish(&topic, Message::new(payload)).await);
}

#[when(expr = "I publish {string} with metadata {string} set to {string} to {string}")]
async fn when_publish_with_metadata(
    world: &mut PubSubWorld,
    payload: String,
    key: String,
    value: String,
    topic: String,
) {
    let message = Message::new(payload).with_metadata(key, value);
    world.publish_result = Some(world.pubsub.publish(&topic, message).await);
}

#[when("I close the pub/sub")]
async fn when_close(world: &mut PubSubWorld) {
    world.pubsub.close().await.expect("Close failed");
}

// ==========================================================================
// Assertions
// ==========================================================================

#[then("the publish succeeds")]
async fn then_publish_succeeds(world: &mut PubSubWorld) {
    match &world.publish_result {
        Some(Ok(())) => {}
        other => panic!("Expected publish to succeed, got {:?}", other),
    }
}

#[then("the publish fails because the pub/sub is closed")]
async fn then_publish_closed(world: &mut PubSubWorld) {
    match &world.publish_result {
        Some(Err(PubSubError::Closed)) => {}
        other => panic!("Expected PubSubError::Closed, got {:?}", other),
    }
}

#[then("the subscribe fails because the pub/sub is closed")]
async fn then_subscribe_closed(world: &mut PubSubWorld) {
    assert!(
        world.subscribe_error.is_some(),
        "Expected subscribe to fail"
    );
}

#[then(expr = "the subscriber on {string} receives {string}")]
async fn then_receives(world: &mut PubSubWorld, topic: String, expected: String) {
    let stream = world
        .streams
        .get_mut(&topic)
        .expect("No subscription on topic");
    let message = next_message(stream).await;
    assert_eq!(message.payload_str(), expected, "Payload should match");
    world.last_received = Some(message);
}

#[then(expr = "the subscriber on {string} receives nothing")]
async fn then_receives_nothing(world: &mut PubSubWorld, topic: String) {
    let stream = world
        .streams
        .get_mut(&topic)
        .expect("No subscription on topic");
    let outcome = timeout(Duration::from_millis(100), stream.next()).await;
    assert!(outcome.is_err(), "Expected no message on '{}'", topic);
}

#[then(expr = "the subscription to {string} has ended")]
async fn then_subscription_ended(world: &mut PubSubWorld, topic: String) {
    let stream = world
        .streams
        .get_mut(&topic)
        .expect("No subscription on topic");
    let outcome = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Timed out waiting for the stream to end");
    assert!(outcome.is_none(), "Stream should have ended");
}

#[then(expr = "the received message has metadata {string} set to {string}")]
async fn then_received_metadata(world: &mut PubSubWorld, key: String, value: String) {
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
