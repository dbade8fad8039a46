//! Token-bucket rate limiter handle (spec §4.6.5).

use std::time::Duration;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::scripts::rate_limiter::RateLimiter;

pub struct RateLimiterHandle {
    inner: RateLimiter,
}

impl RateLimiterHandle {
    /// `rate` tokens are granted every `interval`, up to `max_tokens`
    /// banked at once.
    pub fn new(client: &Client, name: impl Into<String>, max_tokens: u64, rate: u64, interval: Duration) -> Self {
        Self { inner: RateLimiter::new(client.executor().clone(), name, max_tokens, rate, interval) }
    }

    pub async fn try_acquire(&self, n: u64) -> Result<Option<Duration>, ClientError> {
        self.inner.try_acquire(n).await
    }

    pub async fn acquire(&self, n: u64, wait: Duration) -> Result<bool, ClientError> {
        self.inner.acquire(n, wait).await
    }
}
