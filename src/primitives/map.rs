//! Map-cache handle with TTL and max-idle eviction (spec §4.6.4).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::eviction::SortedSetTtlEvictionJob;
use crate::core::scripts::map_cache::MapCache;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(10 * 60);
const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

pub struct MapCacheHandle {
    inner: MapCache,
    default_ttl: Duration,
    default_max_idle: Duration,
}

impl MapCacheHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self::with_defaults(client, name, DEFAULT_TTL, DEFAULT_MAX_IDLE)
    }

    /// Builds the handle and registers its eviction sweep on the client's
    /// running scheduler (C8) right away — callers never need a separate
    /// wiring step for TTL/idle expiry to actually take effect.
    pub fn with_defaults(client: &Client, name: impl Into<String>, default_ttl: Duration, default_max_idle: Duration) -> Self {
        let name = name.into();
        client.register_eviction_job(
            Arc::new(SortedSetTtlEvictionJob::for_map_cache(client.executor().clone(), &name)),
            DEFAULT_EVICTION_INTERVAL,
        );
        Self { inner: MapCache::new(client.executor().clone(), name), default_ttl, default_max_idle }
    }

    pub async fn put(&self, field: &[u8], value: &[u8]) -> Result<(), ClientError> {
        self.inner.put(field, value, self.default_ttl, self.default_max_idle).await
    }

    pub async fn put_with(&self, field: &[u8], value: &[u8], ttl: Duration, max_idle: Duration) -> Result<(), ClientError> {
        self.inner.put(field, value, ttl, max_idle).await
    }

    pub async fn get(&self, field: &[u8]) -> Result<Option<Bytes>, ClientError> {
        self.inner.get(field, self.default_max_idle).await
    }

    pub async fn remove(&self, field: &[u8]) -> Result<bool, ClientError> {
        self.inner.remove(field).await
    }
}
