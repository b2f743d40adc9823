//! In-memory channel-based pub/sub.
//!
//! Uses one tokio broadcast channel per topic within a single process.
//! Ideal for local development and testing without external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::ready;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::{MessageStream, PubSubError, Publisher, Result, Subscriber};
use crate::message::Message;

/// Default broadcast buffer capacity per topic.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Configuration for the in-memory channel pub/sub.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChannelPubSubConfig {
    /// Buffer capacity per topic. A subscriber that falls further behind
    /// than this has its oldest pending messages dropped, with a warning.
    pub capacity: usize,
    /// Retain every published message per topic and replay the backlog to
    /// late subscribers.
    pub persistent: bool,
}

impl Default for ChannelPubSubConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            persistent: false,
        }
    }
}

/// Per-topic channel state.
struct Topic {
    sender: broadcast::Sender<Message>,
    /// Backlog for late subscribers (persistent mode only).
    retained: Vec<Message>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        // broadcast requires capacity >= 1
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            retained: Vec::new(),
        }
    }
}

/// In-memory pub/sub using tokio broadcast channels.
///
/// Every subscriber to a topic receives every message published after its
/// subscription opened; persistent mode additionally replays the retained
/// backlog first. Topics exist implicitly from the first publish or
/// subscribe that names them.
pub struct ChannelPubSub {
    config: ChannelPubSubConfig,
    topics: RwLock<HashMap<String, Topic>>,
    closed: AtomicBool,
}

impl ChannelPubSub {
    /// Create a new channel pub/sub.
    pub fn new(config: ChannelPubSubConfig) -> Self {
        info!(
            capacity = config.capacity,
            persistent = config.persistent,
            "Channel pub/sub initialized"
        );

        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a persistent pub/sub with the default capacity.
    pub fn persistent() -> Self {
        Self::new(ChannelPubSubConfig {
            persistent: true,
            ..Default::default()
        })
    }

    /// Publish one message to a topic.
    ///
    /// Without subscribers the message is retained in persistent mode and
    /// dropped otherwise; neither case is an error.
    pub async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PubSubError::Closed);
        }

        let capacity = self.config.capacity;
        let mut topics = self.topics.write().await;
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(capacity));

        if self.config.persistent {
            entry.retained.push(message.clone());
        }

        match entry.sender.send(message) {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "Published message");
            }
            Err(_) => {
                // No subscribers; that's okay for publish-first scenarios
                debug!(topic = %topic, "Published message (no subscribers)");
            }
        }

        Ok(())
    }

    /// Open a subscription stream to a topic.
    ///
    /// In persistent mode the retained backlog is replayed first, then live
    /// messages follow without gap or duplication. The stream ends when the
    /// pub/sub is closed.
    pub async fn subscribe(&self, topic: &str) -> Result<MessageStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PubSubError::Subscribe {
                topic: topic.to_string(),
                reason: "pub/sub is closed".to_string(),
            });
        }

        let capacity = self.config.capacity;
        let mut topics = self.topics.write().await;
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(capacity));
        let receiver = entry.sender.subscribe();
        let backlog = entry.retained.clone();
        drop(topics);

        debug!(topic = %topic, backlog = backlog.len(), "Subscription opened");

        let topic_name = topic.to_string();
        let live = BroadcastStream::new(receiver).filter_map(move |result| {
            ready(match result {
                Ok(message) => Some(message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        topic = %topic_name,
                        skipped,
                        "Subscriber lagged, dropped oldest messages"
                    );
                    None
                }
            })
        });

        Ok(Box::pin(futures::stream::iter(backlog).chain(live)))
    }

    /// Close the pub/sub: every open subscription stream ends and further
    /// publishes and subscribes return [`PubSubError::Closed`]. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Channel pub/sub already closed");
            return Ok(());
        }

        let mut topics = self.topics.write().await;
        let count = topics.len();
        // Dropping the senders ends every subscriber's stream
        topics.clear();

        info!(topics = count, "Channel pub/sub closed");
        Ok(())
    }
}

impl Default for ChannelPubSub {
    fn default() -> Self {
        Self::new(ChannelPubSubConfig::default())
    }
}

#[async_trait]
impl Publisher for ChannelPubSub {
    async fn publish(&self, topic: &str, message: Message) -> Result<()> {
        ChannelPubSub::publish(self, topic, message).await
    }

    async fn close(&self) -> Result<()> {
        ChannelPubSub::close(self).await
    }
}

#[async_trait]
impl Subscriber for ChannelPubSub {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream> {
        ChannelPubSub::subscribe(self, topic).await
    }

    async fn close(&self) -> Result<()> {
        ChannelPubSub::close(self).await
    }
}
