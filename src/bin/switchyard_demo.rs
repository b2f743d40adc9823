//! Switchyard demo.
//!
//! Publishes a stream of messages through a processing handler wrapped in
//! retry and dead-letter middleware. Every n-th message fails terminally,
//! exhausts its retries, and lands on the dead-letter topic; the rest are
//! forwarded to the output topic. Sink handlers log both outcomes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchyard::config::{Config, LOG_ENV_VAR};
use switchyard::handler::{handler_fn, sink_fn};
use switchyard::message::Message;
use switchyard::middleware::{dead_letter, DeadLetterQueue, Retry};
use switchyard::pubsub::ChannelPubSub;
use switchyard::router::Router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let pubsub = Arc::new(ChannelPubSub::new(config.channel.clone()));
    let mut router = Router::new(config.router.clone().into());

    // Dead-letter first so it wraps the retry middleware: a message is
    // dead-lettered only after its retries are exhausted.
    router.add_middleware(Arc::new(DeadLetterQueue::new(
        pubsub.clone(),
        config.demo.dead_letter_topic.clone(),
    )?));
    router.add_middleware(Arc::new(Retry::new(config.retry.policy())?));

    let process_delay = Duration::from_millis(config.demo.process_delay_ms);
    let fail_every = config.demo.fail_every;
    let processor = handler_fn(move |message: Message| async move {
        tokio::time::sleep(process_delay).await;

        // The generator assigns sequential ids, so the id doubles as the
        // message's sequence number.
        let sequence: usize = message.uuid.parse().unwrap_or(0);
        if sequence > 0 && fail_every > 0 && sequence % fail_every == 0 {
            return Err(format!("simulated failure for message #{sequence}").into());
        }

        Ok(vec![message])
    });
    router.add_handler(
        "processor",
        config.demo.input_topic.as_str(),
        pubsub.clone(),
        config.demo.output_topic.as_str(),
        pubsub.clone(),
        processor,
    )?;

    let delivered = sink_fn(|message: Message| async move {
        info!(
            uuid = %message.uuid,
            payload = %message.payload_str(),
            "Message processed"
        );
        Ok(())
    });
    router.add_no_publisher_handler(
        "processed-logger",
        config.demo.output_topic.as_str(),
        pubsub.clone(),
        delivered,
    )?;

    let dead_lettered = sink_fn(|message: Message| async move {
        let reason = message
            .metadata
            .get(dead_letter::REASON_METADATA_KEY)
            .map(String::as_str)
            .unwrap_or("unknown");
        warn!(
            uuid = %message.uuid,
            reason = %reason,
            payload = %message.payload_str(),
            "Message dead-lettered"
        );
        Ok(())
    });
    router.add_no_publisher_handler(
        "dead-letter-logger",
        config.demo.dead_letter_topic.as_str(),
        pubsub.clone(),
        dead_lettered,
    )?;

    // Generate traffic once the router's subscriptions are up
    let ready = router.ready();
    let generator = {
        let pubsub = pubsub.clone();
        let demo = config.demo.clone();
        tokio::spawn(async move {
            ready.await;
            for i in 1..=demo.message_count {
                let message = Message::with_id(i.to_string(), format!("Hello, I'm message #{i}"));
                debug!(uuid = %message.uuid, "Publishing demo message");
                if let Err(err) = pubsub.publish(&demo.input_topic, message).await {
                    error!(error = %err, "Failed to publish demo message");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(demo.publish_interval_ms)).await;
            }
            info!("Generator finished");
        })
    };

    info!("Demo running, press Ctrl+C to exit");
    router
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    generator.abort();
    pubsub.close().await?;

    Ok(())
}
