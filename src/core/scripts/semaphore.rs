//! Expirable-permit semaphore (spec §4.6.3): acquiring returns a permit
//! id with its own lease; a reclaim sweep folds expired permits back into
//! the free counter before granting new ones.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

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

/// Outcome of one acquire attempt.
enum AcquireOutcome {
    Granted(String),
    /// Wait exactly until this absolute deadline (ms) before retrying —
    /// the moment the earliest outstanding permit reclaims.
    WaitUntil(i64),
}

pub struct Semaphore {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    name: String,
}

impl Semaphore {
    pub fn new(executor: Arc<Executor>, pubsub: Arc<PubSubService>, name: impl Into<String>) -> Self {
        Self { executor, pubsub, name: name.into() }
    }

    fn counter_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "counter").as_bytes())
    }

    fn deadlines_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "deadlines").as_bytes())
    }

    fn channel(&self) -> Bytes {
        Bytes::copy_from_slice(keys::channel(&self.name).as_bytes())
    }

    async fn try_acquire_once(&self, permits: u32, lease: Option<Duration>) -> Result<AcquireOutcome, ClientError> {
        let now = now_millis();
        let permit_id = Uuid::new_v4().simple().to_string();
        let deadline = match lease {
            Some(d) => (now + d.as_millis() as i64).to_string(),
            None => lua::SEMAPHORE_NON_EXPIRING_DEADLINE.to_string(),
        };
        let lease_arg = match lease {
            Some(d) => d.as_millis().to_string(),
            None => lua::SEMAPHORE_NON_EXPIRING_DEADLINE.to_string(),
        };
        let counter_key = self.counter_key();
        let frame = eval_cached(
            &self.executor,
            lua::SEMAPHORE_ACQUIRE,
            vec![counter_key.clone(), self.deadlines_key(), self.channel()],
            vec![
                Bytes::copy_from_slice(permits.to_string().as_bytes()),
                Bytes::copy_from_slice(now.to_string().as_bytes()),
                Bytes::copy_from_slice(permit_id.as_bytes()),
                Bytes::copy_from_slice(lease_arg.as_bytes()),
                Bytes::copy_from_slice(deadline.as_bytes()),
            ],
            RouteKey::Key(counter_key),
        )
        .await?;

        match frame {
            RespFrame::BulkString(id) if id.starts_with(b":") => {
                let deadline_str = String::from_utf8_lossy(&id[1..]).into_owned();
                let deadline: i64 = deadline_str
                    .parse()
                    .map_err(|_| ClientError::Protocol(format!("malformed semaphore wait sentinel: {deadline_str}")))?;
                Ok(AcquireOutcome::WaitUntil(deadline))
            }
            RespFrame::BulkString(id) => Ok(AcquireOutcome::Granted(String::from_utf8_lossy(&id).into_owned())),
            other => Err(ClientError::Protocol(format!("unexpected semaphore acquire reply: {other:?}"))),
        }
    }

    /// Acquires `permits` permits, waiting up to `wait` for the earliest
    /// reclaim in addition to the normal subscribe-wake path (spec
    /// §4.6.3 "Client loop mirrors the lock loop").
    pub async fn acquire(&self, permits: u32, lease: Option<Duration>, wait: Duration) -> Result<Option<String>, ClientError> {
        let deadline = Instant::now() + wait;
        loop {
            match self.try_acquire_once(permits, lease).await? {
                AcquireOutcome::Granted(id) => return Ok(Some(id)),
                AcquireOutcome::WaitUntil(reclaim_at_ms) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }

                    let now_ms = now_millis();
                    let until_reclaim = Duration::from_millis((reclaim_at_ms - now_ms).max(0) as u64).min(remaining);

                    let mut subscription = self.pubsub.subscribe(self.channel()).await?;
                    match tokio::time::timeout(until_reclaim.max(Duration::from_millis(1)), subscription.recv()).await {
                        Ok(Ok(_)) | Err(_) => continue,
                        Ok(Err(e)) => {
                            warn!("semaphore wake-up channel closed: {e}");
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Seeds the free-permits counter to `total`, but only if it hasn't
    /// been set before (spec §4.6.3 boundary scenario 3, `total=2`) —
    /// matches Redisson's `trySetPermits`: the first caller to reach this
    /// wins, later callers are no-ops so concurrent initializers don't
    /// stomp an already-issued permit count. Returns `true` if this call
    /// actually set the counter.
    pub async fn try_set_permits(&self, total: u32) -> Result<bool, ClientError> {
        let counter_key = self.counter_key();
        let frame = eval_cached(
            &self.executor,
            lua::SEMAPHORE_TRY_SET_PERMITS,
            vec![counter_key.clone()],
            vec![Bytes::copy_from_slice(total.to_string().as_bytes())],
            RouteKey::Key(counter_key),
        )
        .await?;
        Ok(decode_integer(frame)? == 1)
    }

    pub async fn release(&self, permit_id: &str) -> Result<bool, ClientError> {
        let counter_key = self.counter_key();
        let frame = eval_cached(
            &self.executor,
            lua::SEMAPHORE_RELEASE,
            vec![counter_key.clone(), self.deadlines_key(), self.channel()],
            vec![Bytes::copy_from_slice(permit_id.as_bytes())],
            RouteKey::Key(counter_key),
        )
        .await?;
        Ok(decode_integer(frame)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_expiring_sentinel_is_preserved_verbatim() {
        assert_eq!(lua::SEMAPHORE_NON_EXPIRING_DEADLINE, "922337203685477");
    }
}
