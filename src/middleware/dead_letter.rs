//! Dead-letter (poison queue) middleware.
//!
//! Absorbs terminal handler failures: the original incoming message is
//! republished to a dead-letter topic with failure metadata, and the router
//! sees success. The dead-letter topic is the observable record of messages
//! the system gave up on.

use std::sync::Arc;

use tracing::warn;

use super::{HandlerContext, Middleware};
use crate::handler::{BoxError, HandlerFn};
use crate::pubsub::Publisher;

/// Metadata key recording the human-readable failure reason.
pub const REASON_METADATA_KEY: &str = "dead_letter.reason";
/// Metadata key recording the binding whose handler failed.
pub const HANDLER_METADATA_KEY: &str = "dead_letter.handler";
/// Metadata key recording when the terminal failure occurred (RFC 3339).
pub const OCCURRED_AT_METADATA_KEY: &str = "dead_letter.occurred_at";

/// Errors from configuring the dead-letter middleware.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Dead-letter topic must not be empty")]
    EmptyTopic,
}

/// Middleware that reroutes terminally failed messages to a dead-letter
/// topic instead of surfacing the error.
///
/// Place it before (outside) the retry middleware in the chain, so it fires
/// only once retries are exhausted. If the dead-letter publish itself fails,
/// that error propagates to the worker; there is no further fallback layer.
pub struct DeadLetterQueue {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl DeadLetterQueue {
    /// Create a dead-letter middleware targeting `topic`.
    pub fn new(
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
    ) -> Result<Self, DeadLetterError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(DeadLetterError::EmptyTopic);
        }
        Ok(Self { publisher, topic })
    }

    /// The configured dead-letter topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Middleware for DeadLetterQueue {
    fn name(&self) -> &str {
        "dead-letter"
    }

    fn wrap(&self, next: HandlerFn, ctx: &HandlerContext) -> HandlerFn {
        let publisher = self.publisher.clone();
        let topic = self.topic.clone();
        let handler_name = ctx.handler_name.clone();

        Arc::new(move |msg| {
            let publisher = publisher.clone();
            let topic = topic.clone();
            let handler_name = handler_name.clone();
            let next = next.clone();

            Box::pin(async move {
                // Keep the incoming message as received; the inner chain
                // works on its own copy.
                let original = msg.clone();

                match next(msg).await {
                    Ok(outputs) => Ok(outputs),
                    Err(err) => {
                        warn!(
                            handler = %handler_name,
                            uuid = %original.uuid,
                            topic = %topic,
                            error = %err,
                            "Terminal failure, rerouting message to dead-letter topic"
                        );

                        let dead = original
                            .with_metadata(REASON_METADATA_KEY, err.to_string())
                            .with_metadata(HANDLER_METADATA_KEY, handler_name)
                            .with_metadata(
                                OCCURRED_AT_METADATA_KEY,
                                chrono::Utc::now().to_rfc3339(),
                            );

                        if let Err(publish_err) = publisher.publish(&topic, dead).await {
                            return Err(Box::new(publish_err) as BoxError);
                        }

                        Ok(Vec::new())
                    }
                }
            })
        })
    }
}
