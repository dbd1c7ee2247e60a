//! Rate-limit retry for transport calls.
//!
//! Only `TransportError::RateLimited` is retried, with exponential backoff
//! (`base_delay * 2^attempt`). Any other error propagates immediately.

use std::future::Future;
use std::time::Duration;

use threadline_types::config::RetryConfig;
use threadline_types::error::TransportError;

/// Delay before retry number `attempt` (0-based).
///
/// A server-provided `retry_after_ms` longer than the backoff wins.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, error: &TransportError) -> Duration {
    let backoff_ms = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(16));
    let server_ms = match error {
        TransportError::RateLimited {
            retry_after_ms: Some(ms),
        } => *ms,
        _ => 0,
    };
    Duration::from_millis(backoff_ms.max(server_ms))
}

/// Run `op`, retrying on rate-limit errors up to `config.max_retries` times.
pub async fn retry_on_rate_limit<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limited() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt, &e);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
