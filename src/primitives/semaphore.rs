//! Expirable-permit semaphore handle (spec §4.6.3).

use std::time::Duration;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::scripts::semaphore::Semaphore;

pub struct SemaphoreHandle {
    inner: Semaphore,
}

impl SemaphoreHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self { inner: Semaphore::new(client.executor().clone(), client.pubsub().clone(), name) }
    }

    /// Acquires `permits` permits with no lease (they live until
    /// released) — equivalent to calling [`SemaphoreHandle::acquire_for`]
    /// with `lease = None`.
    pub async fn acquire(&self, permits: u32, wait: Duration) -> Result<Option<String>, ClientError> {
        self.inner.acquire(permits, None, wait).await
    }

    /// Acquires `permits` permits that auto-reclaim after `lease` if
    /// never released (spec §4.6.3 "expirable permit").
    pub async fn acquire_for(&self, permits: u32, lease: Duration, wait: Duration) -> Result<Option<String>, ClientError> {
        self.inner.acquire(permits, Some(lease), wait).await
    }

    pub async fn release(&self, permit_id: &str) -> Result<bool, ClientError> {
        self.inner.release(permit_id).await
    }

    /// Seeds the permit total if no caller has initialized it yet. Must
    /// be called at least once before `acquire` can ever succeed — the
    /// free-permit counter starts absent, not zero-meaning-uninitialized.
    pub async fn try_set_permits(&self, total: u32) -> Result<bool, ClientError> {
        self.inner.try_set_permits(total).await
    }
}
