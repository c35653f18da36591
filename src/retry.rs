// SPDX-License-Identifier: MIT

use crate::error::{CatalogError, CatalogResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry budget for idempotent upstream requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(1 << attempt.min(16));
        delay.min(self.max_delay)
    }
}

/// Runs `op` once and retries it on retryable failures (408/429/5xx, transport
/// errors) with exponential backoff. Callers must only pass idempotent
/// operations; non-idempotent requests go through `op` directly, untouched by
/// this wrapper.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> CatalogResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CatalogResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream request"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
