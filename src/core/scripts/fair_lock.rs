//! Fair lock (spec §4.6.2): a reentrant lock with FIFO ordering among
//! distinct waiters, backed by a waiters list and a timeouts sorted set.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::warn;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_integer;
use crate::core::protocol::resp::RespFrame;
use crate::core::pubsub::PubSubService;
use crate::core::scripts::{eval_cached, lua};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub struct FairLock {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    name: String,
    holder_id: String,
    lease: Duration,
    waiter_timeout: Duration,
}

impl FairLock {
    pub fn new(
        executor: Arc<Executor>,
        pubsub: Arc<PubSubService>,
        name: impl Into<String>,
        holder_id: impl Into<String>,
        lease: Duration,
        waiter_timeout: Duration,
    ) -> Self {
        Self { executor, pubsub, name: name.into(), holder_id: holder_id.into(), lease, waiter_timeout }
    }

    fn key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::root(&self.name).as_bytes())
    }

    fn waiters_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "waiters").as_bytes())
    }

    fn timeouts_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "timeouts").as_bytes())
    }

    fn channel(&self) -> Bytes {
        Bytes::copy_from_slice(keys::channel(&self.name).as_bytes())
    }

    async fn try_acquire(&self) -> Result<Option<i64>, ClientError> {
        let now = now_millis();
        let key = self.key();
        let frame = eval_cached(
            &self.executor,
            lua::FAIR_LOCK_ACQUIRE,
            vec![key.clone(), self.waiters_key(), self.timeouts_key()],
            vec![
                Bytes::copy_from_slice(self.holder_id.as_bytes()),
                Bytes::copy_from_slice(self.lease.as_millis().to_string().as_bytes()),
                Bytes::copy_from_slice(now.to_string().as_bytes()),
                Bytes::copy_from_slice((now + self.waiter_timeout.as_millis() as i64).to_string().as_bytes()),
            ],
            RouteKey::Key(key),
        )
        .await?;
        match frame {
            RespFrame::Null => Ok(None),
            RespFrame::Integer(ttl) => Ok(Some(ttl)),
            other => Err(ClientError::Protocol(format!("unexpected fair-lock acquire reply: {other:?}"))),
        }
    }

    /// Spec §8 "Fair-lock FIFO": a caller that enqueued earlier is always
    /// granted ahead of a later one, barring its own timeout elapsing —
    /// enforced server-side by the acquire script's head-of-queue check.
    pub async fn acquire(&self, wait: Duration) -> Result<bool, ClientError> {
        let deadline = Instant::now() + wait;
        // Subscribed before the first try so a release published between
        // this try_acquire and the next one is never missed.
        let mut subscription = self.pubsub.subscribe(self.channel()).await?;
        loop {
            if self.try_acquire().await?.is_none() {
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match tokio::time::timeout(remaining, subscription.recv()).await {
                Ok(Ok(_)) | Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("fair-lock wake-up channel closed: {e}");
                    continue;
                }
            }
        }
    }

    pub async fn release(&self) -> Result<bool, ClientError> {
        let key = self.key();
        let frame = eval_cached(
            &self.executor,
            lua::FAIR_LOCK_RELEASE,
            vec![key.clone(), self.waiters_key(), self.timeouts_key(), self.channel()],
            vec![Bytes::copy_from_slice(self.holder_id.as_bytes()), Bytes::from_static(b"1")],
            RouteKey::Key(key),
        )
        .await?;
        Ok(decode_integer(frame)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_topology() -> Arc<crate::core::topology::static_topology::StaticTopology> {
        Arc::new(crate::core::topology::static_topology::StaticTopology::new(
            crate::core::connection::Endpoint::new("127.0.0.1", 6379),
            vec![],
            crate::core::topology::ReadMode::Primary,
            crate::core::connection::PoolConfig::default(),
        ))
    }

    #[test]
    fn auxiliary_keys_share_the_root_hash_tag() {
        let lock = FairLock::new(
            Arc::new(Executor::new(test_topology(), crate::core::executor::ExecutorConfig::default())),
            PubSubService::new(test_topology()),
            "L",
            "h0",
            Duration::from_secs(30),
            Duration::from_secs(5),
        );
        assert_eq!(lock.waiters_key(), Bytes::from_static(b"{L}:waiters"));
        assert_eq!(lock.timeouts_key(), Bytes::from_static(b"{L}:timeouts"));
    }
}
