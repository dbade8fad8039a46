//! Remote executor service handle (spec §4.8): a thin constructor
//! wrapper, since [`RemoteExecutorService`] itself already exposes the
//! full submit/poll/worker surface.

use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::remote_executor::{CronResolver, RecurrenceSpec, RemoteExecutorService, TaskFactory};

pub struct ExecutorServiceHandle {
    inner: RemoteExecutorService,
}

impl ExecutorServiceHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self { inner: RemoteExecutorService::new(client.executor().clone(), client.pubsub().clone(), name) }
    }

    pub fn register_worker(&self, factory: Arc<dyn TaskFactory>) {
        self.inner.register_worker(factory)
    }

    pub fn set_cron_resolver(&self, resolver: Arc<dyn CronResolver>) {
        self.inner.set_cron_resolver(resolver)
    }

    pub async fn submit(&self, factory_id: &str, argument_bytes: Vec<u8>, start_time: Option<Duration>) -> Result<String, ClientError> {
        self.inner.submit(factory_id, argument_bytes, start_time).await
    }

    pub async fn submit_with_recurrence(
        &self,
        factory_id: &str,
        argument_bytes: Vec<u8>,
        start_time: Option<Duration>,
        recurrence: RecurrenceSpec,
    ) -> Result<String, ClientError> {
        self.inner.submit_with_recurrence(factory_id, argument_bytes, start_time, recurrence).await
    }

    pub async fn result(&self, task_id: &str, wait: Duration) -> Result<Option<Vec<u8>>, ClientError> {
        self.inner.result(task_id, wait).await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<bool, ClientError> {
        self.inner.cancel(task_id).await
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.inner.shutdown().await
    }

    pub async fn poll_and_execute_once(&self) -> Result<usize, ClientError> {
        self.inner.poll_and_execute_once().await
    }
}
