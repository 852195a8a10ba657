//! Cancellation Coordinator
//!
//! Links a caller's cancellation token to the checkpoints of a logical call:
//! before dispatch, after the response arrives, while streaming and while
//! waiting between retries.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub(crate) const ABORTED_MESSAGE: &str = "Aborted";
pub(crate) const STREAM_ABORTED_MESSAGE: &str = "Stream aborted";

/// Cancellation scope of one logical call
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
}

impl Cancellation {
    /// Follow `token`, or a private token that never fires when none is given
    pub fn new(token: Option<CancellationToken>) -> Self {
        Self {
            token: token.unwrap_or_default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to the transport so it can abort in-flight work
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `fut` unless cancellation fires first.
    ///
    /// Cancellation is checked before the future is polled, so an already
    /// cancelled scope never starts it.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Sleep for `delay`; false when cancelled before it elapsed
    pub async fn sleep(&self, delay: Duration) -> bool {
        self.guard(tokio::time::sleep(delay)).await.is_some()
    }
}

impl From<CancellationToken> for Cancellation {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
