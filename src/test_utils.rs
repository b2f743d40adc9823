//! Test fixtures: canned handlers and stream helpers.
//!
//! Available to unit tests and, behind the `test-utils` feature, to the
//! interface test suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use crate::handler::{handler_fn, HandlerFn};
use crate::message::Message;
use crate::pubsub::MessageStream;

/// Handler that echoes its input and counts invocations.
pub fn counting_handler() -> (HandlerFn, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler = {
        let count = count.clone();
        handler_fn(move |msg: Message| {
            count.fetch_add(1, Ordering::SeqCst);
            async move { Ok(vec![msg]) }
        })
    };
    (handler, count)
}

/// Handler that always fails with `reason` and counts invocations.
pub fn failing_handler(reason: &str) -> (HandlerFn, Arc<AtomicUsize>) {
    let reason = reason.to_string();
    let count = Arc::new(AtomicUsize::new(0));
    let handler = {
        let count = count.clone();
        handler_fn(move |_msg: Message| {
            count.fetch_add(1, Ordering::SeqCst);
            let reason = reason.clone();
            async move { Err(reason.into()) }
        })
    };
    (handler, count)
}

/// Handler that fails the first `failures` invocations, then echoes.
pub fn flaky_handler(failures: usize) -> (HandlerFn, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler = {
        let count = count.clone();
        handler_fn(move |msg: Message| {
            let attempt = count.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= failures {
                    Err(format!("transient failure on attempt {attempt}").into())
                } else {
                    Ok(vec![msg])
                }
            }
        })
    };
    (handler, count)
}

/// Collect exactly `n` messages from a stream, panicking on timeout.
pub async fn collect_messages(stream: &mut MessageStream, n: usize, wait: Duration) -> Vec<Message> {
    let mut out = Vec::with_capacity(n);
    timeout(wait, async {
        while out.len() < n {
            match stream.next().await {
                Some(msg) => out.push(msg),
                None => break,
            }
        }
    })
    .await
    .expect("timed out collecting messages");
    assert_eq!(out.len(), n, "stream ended before enough messages arrived");
    out
}

/// Assert that nothing arrives on the stream within `window`.
pub async fn assert_no_message(stream: &mut MessageStream, window: Duration) {
    if let Ok(Some(msg)) = timeout(window, stream.next()).await {
        panic!("unexpected message '{}' on stream", msg.uuid);
    }
}
