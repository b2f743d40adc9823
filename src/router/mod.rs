//! Message router: topic -> handler bindings with middleware and workers.
//!
//! This module contains:
//! - `Router`: binding registry plus the run loop
//! - `RouterConfig`: shutdown tuning
//! - `ShutdownSignal` / `ShutdownTrigger`: cooperative cancellation
//!
//! Lifecycle: a router is built (`add_handler`, `add_middleware`), then
//! consumed by [`Router::run`], which subscribes every binding, spawns one
//! worker task per binding, and runs until the injected shutdown signal
//! fires or every subscription ends. Registration after start is impossible
//! by construction since `run` takes the router by value.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::handler::HandlerFn;
use crate::message::Message;
use crate::middleware::{HandlerContext, Middleware, MiddlewareChain};
use crate::pubsub::{MessageStream, PubSubError, Publisher, Subscriber};


/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors that can occur during router setup and execution.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Handler '{name}' is already registered")]
    DuplicateHandler { name: String },

    #[error("Handler '{handler}' failed to subscribe to '{topic}'")]
    Subscribe {
        handler: String,
        topic: String,
        #[source]
        source: PubSubError,
    },

    #[error("Workers did not stop within {0:?} after shutdown")]
    CloseTimeout(Duration),

    #[error("Worker for handler '{handler}' panicked")]
    WorkerPanicked { handler: String },
}

/// Router configuration.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Grace period for workers to drain after the shutdown signal fires;
    /// stragglers are aborted once it expires.
    pub close_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Shutdown signalling
// ============================================================================

/// Cooperative shutdown signal shared by the router and its workers.
///
/// Cloned into every worker and handler context. [`wait`](Self::wait)
/// completes once shutdown is requested; a dropped [`ShutdownTrigger`]
/// counts as a request, so nothing waits on a router that is gone.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a trigger/signal pair.
    pub fn new() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, ShutdownSignal { rx })
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Fires the matching [`ShutdownSignal`]s.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

// ============================================================================
// Router
// ============================================================================

/// One registered topic -> handler binding.
struct Binding {
    name: String,
    input_topic: String,
    subscriber: Arc<dyn Subscriber>,
    /// Publish target for handler outputs; `None` marks a sink binding.
    output: Option<(String, Arc<dyn Publisher>)>,
    handler: HandlerFn,
}

/// Routes messages from input topics through handlers to output topics.
///
/// Each binding gets its own worker task: messages within a binding are
/// handled sequentially in arrival order, while bindings run in parallel.
/// The global middleware chain wraps every binding's handler, outermost
/// first (see [`MiddlewareChain`]).
pub struct Router {
    config: RouterConfig,
    bindings: Vec<Binding>,
    middleware: MiddlewareChain,
    ready_tx: watch::Sender<bool>,
}

impl Router {
    /// Create a router with the given configuration.
    pub fn new(config: RouterConfig) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            config,
            bindings: Vec::new(),
            middleware: MiddlewareChain::new(),
            ready_tx,
        }
    }

    /// Register a transform binding: messages from `subscribe_topic` run
    /// through `handler`, and every returned message is published to
    /// `publish_topic`.
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        publish_topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        handler: HandlerFn,
    ) -> Result<()> {
        let name = name.into();
        self.check_name(&name)?;
        let subscribe_topic = subscribe_topic.into();
        let publish_topic = publish_topic.into();

        info!(
            handler = %name,
            subscribe_topic = %subscribe_topic,
            publish_topic = %publish_topic,
            "Handler registered"
        );

        self.bindings.push(Binding {
            name,
            input_topic: subscribe_topic,
            subscriber,
            output: Some((publish_topic, publisher)),
            handler,
        });
        Ok(())
    }

    /// Register a sink binding: messages from `subscribe_topic` run through
    /// `handler` for side effects only; returned messages are discarded.
    pub fn add_no_publisher_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        handler: HandlerFn,
    ) -> Result<()> {
        let name = name.into();
        self.check_name(&name)?;
        let subscribe_topic = subscribe_topic.into();

        info!(
            handler = %name,
            subscribe_topic = %subscribe_topic,
            "Sink handler registered"
        );

        self.bindings.push(Binding {
            name,
            input_topic: subscribe_topic,
            subscriber,
            output: None,
            handler,
        });
        Ok(())
    }

    /// Append middleware to the global chain.
    ///
    /// The first middleware added becomes the outermost wrapper for every
    /// binding; see [`MiddlewareChain`] for the ordering contract.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        debug!(
            middleware = middleware.name(),
            position = self.middleware.len(),
            "Middleware added"
        );
        self.middleware.push(middleware);
    }

    /// Future that resolves once every binding's subscription is
    /// established and the workers are running (or the router is gone).
    ///
    /// Lets callers sequence publishes after startup without sleeping.
    pub fn ready(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.ready_tx.subscribe();
        async move {
            let _ = rx.wait_for(|ready| *ready).await;
        }
    }

    /// Run the router until `signal` completes or every subscription ends.
    ///
    /// All subscriptions are established before any worker starts. If every
    /// binding fails to subscribe, the first error is returned immediately;
    /// if only some fail, the healthy bindings run and the first error is
    /// returned once the router stops. On shutdown, workers get
    /// [`RouterConfig::close_timeout`] to drain before being aborted.
    pub async fn run<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(bindings = self.bindings.len(), "Router starting");

        if self.bindings.is_empty() {
            warn!("Router has no handler bindings, nothing to run");
            self.ready_tx.send_replace(true);
            return Ok(());
        }

        let (shutdown_trigger, shutdown) = ShutdownSignal::new();

        // Establish every subscription before any worker starts, so no
        // binding observes traffic another binding already consumed.
        let bindings = std::mem::take(&mut self.bindings);
        let mut workers = Vec::new();
        let mut startup_errors = Vec::new();
        for binding in bindings {
            match binding.subscriber.subscribe(&binding.input_topic).await {
                Ok(stream) => {
                    let ctx = HandlerContext::new(binding.name.clone(), shutdown.clone());
                    let handler = self.middleware.compose(binding.handler, &ctx);
                    let worker = Worker {
                        name: binding.name,
                        input_topic: binding.input_topic,
                        output: binding.output,
                        handler,
                        shutdown: shutdown.clone(),
                    };
                    workers.push((worker, stream));
                }
                Err(err) => {
                    error!(
                        handler = %binding.name,
                        topic = %binding.input_topic,
                        error = %err,
                        "Subscription failed, binding will not run"
                    );
                    startup_errors.push(RouterError::Subscribe {
                        handler: binding.name,
                        topic: binding.input_topic,
                        source: err,
                    });
                }
            }
        }

        if workers.is_empty() {
            return Err(startup_errors.remove(0));
        }

        let mut names = Vec::with_capacity(workers.len());
        let mut handles = Vec::with_capacity(workers.len());
        for (worker, stream) in workers {
            names.push(worker.name.clone());
            handles.push(tokio::spawn(run_worker(worker, stream)));
        }
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut workers_done = join_all(handles);

        self.ready_tx.send_replace(true);
        info!(workers = names.len(), "Router running");

        tokio::pin!(signal);

        let results = tokio::select! {
            _ = &mut signal => {
                info!("Shutdown signal received, stopping router");
                shutdown_trigger.shutdown();

                match tokio::time::timeout(self.config.close_timeout, &mut workers_done).await {
                    Ok(results) => results,
                    Err(_) => {
                        error!(
                            timeout_ms = self.config.close_timeout.as_millis() as u64,
                            "Workers did not stop within close timeout, aborting"
                        );
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        return Err(RouterError::CloseTimeout(self.config.close_timeout));
                    }
                }
            }
            results = &mut workers_done => {
                info!("All bindings stopped on their own");
                results
            }
        };

        info!("Router stopped");

        if let Some(err) = startup_errors.into_iter().next() {
            return Err(err);
        }

        for (name, result) in names.iter().zip(results) {
            if let Err(join_err) = result {
                if join_err.is_panic() {
                    error!(handler = %name, "Worker panicked");
                    return Err(RouterError::WorkerPanicked {
                        handler: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.bindings.iter().any(|b| b.name == name) {
            return Err(RouterError::DuplicateHandler {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

// ============================================================================
// Binding workers
// ============================================================================

/// Worker state for one binding: name, composed handler, output target.
///
/// The subscription stream travels alongside as a separate value; keeping it
/// out of this struct leaves the state borrowed across awaits `Sync`, which
/// the spawned worker future needs.
struct Worker {
    name: String,
    input_topic: String,
    output: Option<(String, Arc<dyn Publisher>)>,
    handler: HandlerFn,
    shutdown: ShutdownSignal,
}

impl Worker {
    /// Run one message through the composed chain and publish its outputs.
    ///
    /// Errors here are fatal for this message only: chain failures were
    /// either absorbed by middleware or are logged, and publish failures
    /// are logged per output. The binding keeps consuming either way.
    async fn handle(&self, message: Message) {
        let uuid = message.uuid.clone();
        debug!(handler = %self.name, uuid = %uuid, "Handling message");

        match (self.handler)(message).await {
            Ok(outputs) => match &self.output {
                Some((topic, publisher)) => {
                    for out in outputs {
                        let out_uuid = out.uuid.clone();
                        if let Err(err) = publisher.publish(topic, out).await {
                            error!(
                                handler = %self.name,
                                topic = %topic,
                                uuid = %out_uuid,
                                error = %err,
                                "Failed to publish handler output"
                            );
                        }
                    }
                }
                None => {
                    if !outputs.is_empty() {
                        debug!(
                            handler = %self.name,
                            discarded = outputs.len(),
                            "Sink binding discarded handler outputs"
                        );
                    }
                }
            },
            Err(err) => {
                error!(
                    handler = %self.name,
                    uuid = %uuid,
                    error = %err,
                    "Message processing failed"
                );
            }
        }
    }
}

/// Per-binding loop: pull messages sequentially until shutdown or the
/// subscription ends. In-flight work finishes before shutdown is observed.
async fn run_worker(worker: Worker, mut stream: MessageStream) {
    info!(
        handler = %worker.name,
        topic = %worker.input_topic,
        "Binding worker started"
    );

    loop {
        tokio::select! {
            biased;

            _ = worker.shutdown.wait() => {
                info!(handler = %worker.name, "Shutdown requested, stopping binding");
                break;
            }

            maybe = stream.next() => {
                let Some(message) = maybe else {
                    info!(
                        handler = %worker.name,
                        topic = %worker.input_topic,
                        "Subscription ended, stopping binding"
                    );
                    break;
                };

                worker.handle(message).await;
            }
        }
    }

    info!(handler = %worker.name, "Binding worker stopped");
}
