//! Reentrant lock handle (spec §4.6.1), constructed from a [`Client`]
//! with a fresh per-process holder id.

use std::time::Duration;

use uuid::Uuid;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::scripts::lock::Lock;

const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// A reentrant lock named `name`. Each `LockHandle` mints its own holder
/// id, so reentrancy (spec §4.6.1 "reentrant... within the same holder")
/// applies to repeated `acquire` calls on the *same handle*, not across
/// independently constructed handles for the same name.
pub struct LockHandle {
    inner: Lock,
}

impl LockHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self::with_lease(client, name, DEFAULT_LEASE)
    }

    pub fn with_lease(client: &Client, name: impl Into<String>, lease: Duration) -> Self {
        let holder_id = Uuid::new_v4().simple().to_string();
        Self { inner: Lock::new(client.executor().clone(), client.pubsub().clone(), name, holder_id, lease) }
    }

    pub async fn acquire(&mut self, wait: Duration) -> Result<bool, ClientError> {
        self.inner.acquire(wait).await
    }

    pub async fn release(&mut self) -> Result<bool, ClientError> {
        self.inner.release().await
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_held()
    }
}
