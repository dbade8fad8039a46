//! Map-cache with TTL and max-idle (spec §4.6.4). Entries live in a hash;
//! two parallel sorted sets track ttl and idle-access deadlines. Eviction
//! itself is driven centrally by the scheduler (C8) via
//! [`lua::MAP_CACHE_EVICT`]; this module is the read/write side.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_bulk_opt;
use crate::core::protocol::resp::RespFrame;
use crate::core::scripts::{eval_cached, lua};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub struct MapCache {
    executor: Arc<Executor>,
    name: String,
}

impl MapCache {
    pub fn new(executor: Arc<Executor>, name: impl Into<String>) -> Self {
        Self { executor, name: name.into() }
    }

    fn data_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::root(&self.name).as_bytes())
    }

    fn ttl_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "ttlset").as_bytes())
    }

    fn idle_key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::aux(&self.name, "idleset").as_bytes())
    }

    /// Writes `field`, resetting both the ttl and idle deadlines.
    pub async fn put(&self, field: &[u8], value: &[u8], ttl: Duration, max_idle: Duration) -> Result<(), ClientError> {
        let now = now_millis();
        let data_key = self.data_key();
        eval_cached(
            &self.executor,
            lua::MAP_CACHE_PUT,
            vec![data_key.clone(), self.ttl_key(), self.idle_key()],
            vec![
                Bytes::copy_from_slice(field),
                Bytes::copy_from_slice(value),
                Bytes::copy_from_slice((now + ttl.as_millis() as i64).to_string().as_bytes()),
                Bytes::copy_from_slice((now + max_idle.as_millis() as i64).to_string().as_bytes()),
            ],
            RouteKey::Key(data_key),
        )
        .await?;
        Ok(())
    }

    /// Reads `field`, treating it as absent once its ttl or idle deadline
    /// has passed even if the scheduler (C8) hasn't swept it out yet, and
    /// refreshing its idle deadline on a live hit (spec §4.6.4 "Every read
    /// updates the idle score"). The deadline check and the read happen in
    /// one script so a sweep racing this call can't hand back a value the
    /// eviction job is in the middle of deleting.
    pub async fn get(&self, field: &[u8], max_idle: Duration) -> Result<Option<Bytes>, ClientError> {
        let data_key = self.data_key();
        let now = now_millis();
        let new_deadline = now + max_idle.as_millis() as i64;
        let frame = eval_cached(
            &self.executor,
            lua::MAP_CACHE_GET,
            vec![data_key.clone(), self.ttl_key(), self.idle_key()],
            vec![
                Bytes::copy_from_slice(field),
                Bytes::copy_from_slice(now.to_string().as_bytes()),
                Bytes::copy_from_slice(new_deadline.to_string().as_bytes()),
            ],
            RouteKey::Key(data_key),
        )
        .await?;
        decode_bulk_opt(frame)
    }

    pub async fn remove(&self, field: &[u8]) -> Result<bool, ClientError> {
        let data_key = self.data_key();
        let reply = self
            .executor
            .send_raw(
                "HDEL",
                vec![data_key.clone(), Bytes::copy_from_slice(field)],
                RouteKey::Key(data_key),
                false,
            )
            .await?;
        let removed = matches!(reply, RespFrame::Integer(1));
        if removed {
            let ttl_key = self.ttl_key();
            self.executor
                .send_raw(
                    "ZREM",
                    vec![ttl_key.clone(), Bytes::copy_from_slice(field)],
                    RouteKey::Key(ttl_key),
                    false,
                )
                .await?;
            let idle_key = self.idle_key();
            self.executor
                .send_raw(
                    "ZREM",
                    vec![idle_key.clone(), Bytes::copy_from_slice(field)],
                    RouteKey::Key(idle_key),
                    false,
                )
                .await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_and_idle_keys_are_distinct_auxiliaries() {
        let cache = MapCache::new(
            Arc::new(Executor::new(
                Arc::new(crate::core::topology::static_topology::StaticTopology::new(
                    crate::core::connection::Endpoint::new("127.0.0.1", 6379),
                    vec![],
                    crate::core::topology::ReadMode::Primary,
                    crate::core::connection::PoolConfig::default(),
                )),
                crate::core::executor::ExecutorConfig::default(),
            )),
            "cache",
        );
        assert_ne!(cache.ttl_key(), cache.idle_key());
    }
}
