//! Token-bucket rate limiter (spec §4.6.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::resp::RespFrame;
use crate::core::scripts::{eval_cached, lua};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub struct RateLimiter {
    executor: Arc<Executor>,
    name: String,
    max_tokens: u64,
    tokens_per_ms: f64,
}

impl RateLimiter {
    /// `rate` and `interval` together define refill speed: `rate` tokens
    /// granted every `interval`.
    pub fn new(executor: Arc<Executor>, name: impl Into<String>, max_tokens: u64, rate: u64, interval: Duration) -> Self {
        let tokens_per_ms = rate as f64 / interval.as_millis().max(1) as f64;
        Self { executor, name: name.into(), max_tokens, tokens_per_ms }
    }

    fn bucket_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "bucket").as_bytes())
    }

    /// Attempts to acquire `n` tokens. `Ok(None)` means they were
    /// granted; `Ok(Some(wait))` is the shortfall's wait time before
    /// retrying (spec §4.6.5).
    pub async fn try_acquire(&self, n: u64) -> Result<Option<Duration>, ClientError> {
        let key = self.bucket_key();
        let frame = eval_cached(
            &self.executor,
            lua::RATE_LIMITER_ACQUIRE,
            vec![key.clone()],
            vec![
                Bytes::copy_from_slice(self.max_tokens.to_string().as_bytes()),
                Bytes::copy_from_slice(self.tokens_per_ms.to_string().as_bytes()),
                Bytes::copy_from_slice(now_millis().to_string().as_bytes()),
                Bytes::copy_from_slice(n.to_string().as_bytes()),
            ],
            RouteKey::Key(key),
        )
        .await?;

        match frame {
            RespFrame::Null => Ok(None),
            RespFrame::Integer(wait_ms) => Ok(Some(Duration::from_millis(wait_ms.max(0) as u64))),
            other => Err(ClientError::Protocol(format!("unexpected rate limiter reply: {other:?}"))),
        }
    }

    /// Blocks until `n` tokens are available or `wait` elapses.
    pub async fn acquire(&self, n: u64, wait: Duration) -> Result<bool, ClientError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match self.try_acquire(n).await? {
                None => return Ok(true),
                Some(shortfall) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    tokio::time::sleep(shortfall.min(remaining)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_per_ms_reflects_the_configured_rate() {
        let limiter = RateLimiter::new(
            Arc::new(Executor::new(
                Arc::new(crate::core::topology::static_topology::StaticTopology::new(
                    crate::core::connection::Endpoint::new("127.0.0.1", 6379),
                    vec![],
                    crate::core::topology::ReadMode::Primary,
                    crate::core::connection::PoolConfig::default(),
                )),
                crate::core::executor::ExecutorConfig::default(),
            )),
            "limiter",
            100,
            10,
            Duration::from_secs(1),
        );
        assert!((limiter.tokens_per_ms - 0.01).abs() < f64::EPSILON);
    }
}
