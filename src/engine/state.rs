//! Per-call attempt bookkeeping: the retry budget and the single-fire latch
//! that guards the terminal error callback.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use crate::error::CompletionError;

/// How many times a logical call may be retried, and how far apart
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Option<ExponentialBackoff>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Immediate retries, at most `max_retries` after the first attempt
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Wait between attempts according to `backoff`
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn has_backoff(&self) -> bool {
        self.backoff.is_some()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

/// Mutable state of one logical call, across all of its attempts.
///
/// Owned by a single driver invocation; never shared between calls.
pub struct RequestAttemptState<E> {
    attempt: u32,
    retries: u32,
    max_retries: u32,
    backoff: Option<ExponentialBackoff>,
    on_error: Option<E>,
}

impl<E> RequestAttemptState<E>
where
    E: FnOnce(CompletionError),
{
    pub fn new(policy: &RetryPolicy, on_error: E) -> Self {
        let backoff = policy.backoff.clone().map(|mut backoff| {
            backoff.reset();
            backoff
        });

        Self {
            attempt: 1,
            retries: 0,
            max_retries: policy.max_retries,
            backoff,
            on_error: Some(on_error),
        }
    }

    /// 1-based number of the attempt in progress
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Consume one retry from the budget; false once it is spent.
    pub fn try_retry(&mut self) -> bool {
        if self.retries >= self.max_retries {
            return false;
        }
        self.retries += 1;
        self.attempt += 1;
        true
    }

    /// Delay before the next attempt, if backoff is configured
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.backoff.as_mut().and_then(|backoff| backoff.next_backoff())
    }

    /// Deliver the terminal error. Only the first report reaches the callback.
    pub fn report(&mut self, error: CompletionError) -> bool {
        match self.on_error.take() {
            Some(handler) => {
                handler(error);
                true
            }
            None => {
                tracing::debug!(error = %error, "terminal error already reported, dropping");
                false
            }
        }
    }

    pub fn is_reported(&self) -> bool {
        self.on_error.is_none()
    }
}
