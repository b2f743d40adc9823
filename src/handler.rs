//! Handler function types and adapters.
//!
//! A handler maps one input message to zero or more output messages, or acts
//! as a side-effecting sink. Both shapes are carried through the router as a
//! single [`HandlerFn`] type so middleware can wrap either uniformly.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::message::Message;

/// Boxed error for handler failures.
///
/// Handler failure reasons are user-defined; the router only forwards them
/// (to logs or dead-letter metadata), so a trait object is enough.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation: zero or more output messages.
pub type HandlerResult = Result<Vec<Message>, BoxError>;

/// A processing function bound to one input topic.
///
/// Arc'd so the router and middleware clone it into worker tasks; the
/// returned future owns its captures for the same reason.
pub type HandlerFn = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async transform closure into a [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// Wrap an async side-effecting closure into a [`HandlerFn`] emitting no
/// output messages.
pub fn sink_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |msg| {
        let fut = f(msg);
        Box::pin(async move { fut.await.map(|()| Vec::new()) })
    })
}
