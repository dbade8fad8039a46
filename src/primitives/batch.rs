//! Batch handle (spec §4.5): a thin constructor wrapper, since
//! [`Batch`] itself already exposes the full enqueue/execute surface.

use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::core::batch::{Batch, Deferred, ExecutionMode, ReplicaSync};
use crate::core::protocol::command::RouteKey;

pub struct BatchHandle {
    inner: Batch,
}

impl BatchHandle {
    pub fn new(client: &Client, mode: ExecutionMode) -> Self {
        Self { inner: Batch::new(client.executor().clone(), mode) }
    }

    pub fn with_replica_sync(mut self, replica_count: u32, sync_timeout: Duration) -> Self {
        self.inner = self.inner.with_replica_sync(ReplicaSync { replica_count, sync_timeout });
        self
    }

    pub fn enqueue(&mut self, name: &'static str, args: Vec<Bytes>, route: RouteKey) -> Deferred {
        self.inner.enqueue(name, args, route)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub async fn execute(self) -> Result<crate::core::batch::BatchResult, crate::core::errors::ClientError> {
        self.inner.execute().await
    }
}
