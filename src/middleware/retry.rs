//! Retry middleware with exponential backoff.
//!
//! Uses `backon` for the delay sequence. The middleware owns attempt
//! accounting and the elapsed-time cutoff; the handler never sees either.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{HandlerContext, Middleware};
use crate::handler::HandlerFn;

/// Errors from an invalid retry policy, detected at setup time.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("Multiplier must be >= 1, got {0}")]
    MultiplierTooSmall(f64),

    #[error("Initial interval must be greater than zero")]
    ZeroInitialInterval,
}

/// Backoff policy for the retry middleware.
///
/// The delay before the k-th retry is
/// `min(max_interval, initial_interval * multiplier^(k-1))`, with no jitter
/// unless [`jitter`](Self::jitter) is set.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Re-invocations allowed after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Factor applied to the delay after each failed attempt. Must be >= 1.
    pub multiplier: f64,
    /// Overall retry budget measured from the first attempt; once exceeded,
    /// no further retries happen. `None` means no time limit.
    pub max_elapsed_time: Option<Duration>,
    /// Randomize each delay. Off by default, keeping backoff deterministic.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(600),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(3600)),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Validate the policy invariants.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.multiplier < 1.0 {
            return Err(PolicyError::MultiplierTooSmall(self.multiplier));
        }
        if self.initial_interval.is_zero() {
            return Err(PolicyError::ZeroInitialInterval);
        }
        Ok(())
    }

    /// Delay sequence, one entry per allowed retry.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_interval)
            .with_max_delay(self.max_interval)
            .with_factor(self.multiplier as f32)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder = builder.with_jitter();
        }
        builder.build()
    }
}

/// Middleware that re-invokes a failing handler per a [`RetryPolicy`].
///
/// Success passes through untouched. On failure the handler is re-invoked
/// after an exponential delay until it succeeds, the retry budget runs out,
/// or shutdown is requested. The last handler error is returned unchanged on
/// exhaustion, so outer middleware observes the true terminal failure.
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    /// Create a retry middleware, rejecting invalid policies.
    pub fn new(policy: RetryPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }
}

impl Middleware for Retry {
    fn name(&self) -> &str {
        "retry"
    }

    fn wrap(&self, next: HandlerFn, ctx: &HandlerContext) -> HandlerFn {
        let policy = self.policy.clone();
        let handler_name = ctx.handler_name.clone();
        let shutdown = ctx.shutdown.clone();

        Arc::new(move |msg| {
            let policy = policy.clone();
            let handler_name = handler_name.clone();
            let shutdown = shutdown.clone();
            let next = next.clone();

            Box::pin(async move {
                let started = Instant::now();
                let mut delays = policy.backoff();
                let mut retries: usize = 0;

                loop {
                    match next(msg.clone()).await {
                        Ok(outputs) => return Ok(outputs),
                        Err(err) => {
                            let Some(delay) = delays.next() else {
                                warn!(
                                    handler = %handler_name,
                                    uuid = %msg.uuid,
                                    retries,
                                    error = %err,
                                    "Retries exhausted"
                                );
                                return Err(err);
                            };

                            if let Some(budget) = policy.max_elapsed_time {
                                if started.elapsed() >= budget {
                                    warn!(
                                        handler = %handler_name,
                                        uuid = %msg.uuid,
                                        retries,
                                        error = %err,
                                        "Retry time budget exceeded"
                                    );
                                    return Err(err);
                                }
                            }

                            debug!(
                                handler = %handler_name,
                                uuid = %msg.uuid,
                                retry = retries + 1,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Handler failed, backing off before retry"
                            );

                            tokio::select! {
                                _ = sleep(delay) => {}
                                _ = shutdown.wait() => {
                                    warn!(
                                        handler = %handler_name,
                                        uuid = %msg.uuid,
                                        retries,
                                        "Shutdown requested during backoff, abandoning retries"
                                    );
                                    return Err(err);
                                }
                            }

                            retries += 1;
                        }
                    }
                }
            })
        })
    }
}
