//! Retry policies for steps and callback arm functions.
//!
//! A policy is a single decision function: given the error and the 1-based
//! number of the attempt that just failed, either retry after a delay or stop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::TaskError;

/// Status codes treated as transient by [`RetryPolicy::transient_http`].
pub const TRANSIENT_HTTP_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// Outcome of consulting a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-invoke after `delay`. A zero delay retries within the same invocation.
    Retry { delay: Duration },
    /// Give up; the error becomes the recorded outcome.
    Stop,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

type DecideFn = dyn Fn(&TaskError, u32) -> RetryDecision + Send + Sync;

/// Decides whether a failed attempt should be retried.
///
/// The default policy never retries.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    decide: Option<Arc<DecideFn>>,
}

impl RetryPolicy {
    /// Policy from an arbitrary decision function.
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(&TaskError, u32) -> RetryDecision + Send + Sync + 'static,
    {
        Self {
            decide: Some(Arc::new(decide)),
        }
    }

    /// Fail on the first error.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry any error with a constant delay until `max_attempts` have been made.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(move |_, attempt| {
            if attempt < max_attempts {
                RetryDecision::Retry { delay }
            } else {
                RetryDecision::Stop
            }
        })
    }

    /// Retry any error, doubling the delay after each attempt up to `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(move |_, attempt| {
            if attempt < max_attempts {
                RetryDecision::Retry {
                    delay: backoff(initial_delay, max_delay, attempt),
                }
            } else {
                RetryDecision::Stop
            }
        })
    }

    /// Exponential backoff, but only for errors whose status is transient.
    ///
    /// Errors without a status code, or with a permanent one, stop at once.
    pub fn transient_http(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(move |error, attempt| {
            let transient = error
                .status
                .is_some_and(|s| TRANSIENT_HTTP_STATUSES.contains(&s));
            if transient && attempt < max_attempts {
                RetryDecision::Retry {
                    delay: backoff(initial_delay, max_delay, attempt),
                }
            } else {
                RetryDecision::Stop
            }
        })
    }

    /// Consult the policy for the attempt that just failed.
    pub fn decide(&self, error: &TaskError, attempt: u32) -> RetryDecision {
        match &self.decide {
            Some(decide) => decide(error, attempt),
            None => RetryDecision::Stop,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("custom", &self.decide.is_some())
            .finish()
    }
}

/// `initial * 2^(attempt - 1)`, capped at `max`.
fn backoff(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exp).min(max)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
