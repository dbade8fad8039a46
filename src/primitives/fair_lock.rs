//! Fair lock handle (spec §4.6.2): FIFO-ordered reentrant lock.

use std::time::Duration;

use uuid::Uuid;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::scripts::fair_lock::FairLock;

const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const DEFAULT_WAITER_TIMEOUT: Duration = Duration::from_secs(60);

pub struct FairLockHandle {
    inner: FairLock,
}

impl FairLockHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self::with_lease(client, name, DEFAULT_LEASE, DEFAULT_WAITER_TIMEOUT)
    }

    pub fn with_lease(client: &Client, name: impl Into<String>, lease: Duration, waiter_timeout: Duration) -> Self {
        let holder_id = Uuid::new_v4().simple().to_string();
        Self {
            inner: FairLock::new(client.executor().clone(), client.pubsub().clone(), name, holder_id, lease, waiter_timeout),
        }
    }

    pub async fn acquire(&self, wait: Duration) -> Result<bool, ClientError> {
        self.inner.acquire(wait).await
    }

    pub async fn release(&self) -> Result<bool, ClientError> {
        self.inner.release().await
    }
}
