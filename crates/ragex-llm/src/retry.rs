use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// How a provider reacts to HTTP 429.
///
/// Only rate limiting is retried. Transport failures and every other status
/// go straight back to the caller, so an unreachable backend fails fast.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for both `Retry-After` and computed backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: the server's `Retry-After`
    /// seconds when present, otherwise `base_delay * 2^attempt`.
    pub fn delay(&self, retry_after: Option<&str>, attempt: u32) -> Duration {
        let delay = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or_else(
                || self.base_delay.saturating_mul(1 << attempt.min(16)),
                Duration::from_secs,
            );
        delay.min(self.max_delay)
    }

    /// Send the request built by `send`, retrying on 429.
    ///
    /// # Errors
    ///
    /// [`LlmError::RateLimited`] once retries run out, [`LlmError::Http`] on
    /// transport failure.
    pub async fn send<F, Fut>(
        &self,
        provider: &'static str,
        mut send: F,
    ) -> Result<reqwest::Response, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            let response = send().await.map_err(LlmError::Http)?;
            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if attempt >= self.max_retries {
                tracing::warn!(provider, attempts = attempt + 1, "rate limit retries exhausted");
                return Err(LlmError::RateLimited);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            let delay = self.delay(retry_after, attempt);
            tracing::warn!(
                provider,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                retry = attempt + 1,
                max_retries = self.max_retries,
                "rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
