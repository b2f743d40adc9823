//! Switchyard - In-process message routing
//!
//! A message router built on topic pub/sub: handlers subscribe to input
//! topics, transform messages, and publish the results, with retry and
//! dead-letter middleware wrapping every handler.

pub mod config;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod pubsub;
pub mod router;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
