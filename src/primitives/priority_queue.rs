//! Priority blocking queue handle (spec §4.6.7).

use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::scripts::priority_queue::PriorityQueue;

pub struct PriorityQueueHandle {
    inner: PriorityQueue,
}

impl PriorityQueueHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self { inner: PriorityQueue::new(client.executor().clone(), name) }
    }

    pub async fn offer(&self, value: &[u8], priority: f64) -> Result<(), ClientError> {
        self.inner.offer(value, priority).await
    }

    pub async fn take(&self, wait: Duration) -> Result<Option<Bytes>, ClientError> {
        self.inner.take(wait).await
    }
}
