//! Topic-addressed publish/subscribe transport.
//!
//! This module contains:
//! - `Publisher` / `Subscriber` traits: the transport contract the router
//!   depends on
//! - `MessageStream`: the lazy subscription sequence
//! - Implementations: in-memory broadcast channel
//!
//! The router never assumes anything about delivery beyond this contract, so
//! a broker-backed transport can slot in behind the same two traits.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::message::Message;

pub mod channel;

pub use channel::{ChannelPubSub, ChannelPubSubConfig};

// ============================================================================
// Traits
// ============================================================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("Pub/sub is closed")]
    Closed,

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Lazy, effectively infinite sequence of messages from one subscription.
///
/// Ends when the transport closes. Not restartable; a fresh call to
/// [`Subscriber::subscribe`] starts a new subscription.
pub type MessageStream = BoxStream<'static, Message>;

/// Producer side of the transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message to a topic.
    ///
    /// Topics exist implicitly; no creation step is required. Behavior with
    /// no subscriber (buffer or drop) is implementation defined, but
    /// failures must surface as errors rather than vanish.
    async fn publish(&self, topic: &str, message: Message) -> Result<()>;

    /// Close the producer side. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Consumer side of the transport.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Open a subscription to a topic.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream>;

    /// Close the consumer side, ending all open subscription streams.
    ///
    /// Idempotent; must not block outstanding publishes.
    async fn close(&self) -> Result<()>;
}
