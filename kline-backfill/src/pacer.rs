//! Injectable pacing strategies for the fixed inter-call and inter-resolution delays.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Waits out a rate limiting delay between upstream calls.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// Wait for `delay`, returning `false` if the wait was cut short by `cancel`.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Pacer for NoDelay {
    async fn pause(&self, _: Duration, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
    }
}
