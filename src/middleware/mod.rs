//! Composable middleware around handler functions.
//!
//! This module contains:
//! - `Middleware` trait: one wrapper around a [`HandlerFn`]
//! - `MiddlewareChain`: an ordered list composed once per binding
//! - `HandlerContext`: per-binding context (name, shutdown signal)
//! - Implementations: retry with exponential backoff, dead-letter queue
//!
//! Ordering is explicit: chain index 0 is the outermost wrapper. The demo
//! arrangement is `[DeadLetterQueue, Retry]`, so the dead-letter middleware
//! observes only failures that survived every retry.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::handler::HandlerFn;
use crate::router::ShutdownSignal;

pub mod dead_letter;
pub mod retry;

pub use dead_letter::DeadLetterQueue;
pub use retry::{Retry, RetryPolicy};

/// Per-binding context handed to middleware at composition time.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    /// Name of the binding the wrapped handler belongs to.
    pub handler_name: String,
    /// Cooperative shutdown signal, for interrupting long waits.
    pub shutdown: ShutdownSignal,
}

impl HandlerContext {
    /// Create a context for a named binding.
    pub fn new(handler_name: impl Into<String>, shutdown: ShutdownSignal) -> Self {
        Self {
            handler_name: handler_name.into(),
            shutdown,
        }
    }
}

/// One wrapper around a handler function.
///
/// `wrap` receives the next step of the chain and returns the wrapped
/// handler. Composition happens once per binding when the router starts;
/// per-message work lives inside the returned closure.
pub trait Middleware: Send + Sync {
    /// Short name used in chain logs.
    fn name(&self) -> &str;

    /// Wrap the next handler in the chain.
    fn wrap(&self, next: HandlerFn, ctx: &HandlerContext) -> HandlerFn;
}

/// Ordered middleware chain.
///
/// Index 0 is the outermost wrapper: it sees the incoming message first and
/// the final result last. This ordering is part of the contract, not a side
/// effect of registration call order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware as the innermost wrapper so far.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    /// Builder-style [`push`](Self::push).
    pub fn then(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    /// Number of middleware in the chain.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Middleware names in outermost-first order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|m| m.name()).collect()
    }

    /// Compose the chain around a base handler.
    ///
    /// Wrapping runs innermost-first so that entry 0 ends up outermost.
    pub fn compose(&self, base: HandlerFn, ctx: &HandlerContext) -> HandlerFn {
        debug!(
            handler = %ctx.handler_name,
            chain = ?self.names(),
            "Composing middleware chain"
        );

        self.entries
            .iter()
            .rev()
            .fold(base, |inner, middleware| middleware.wrap(inner, ctx))
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
