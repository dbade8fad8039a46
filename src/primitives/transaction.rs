//! Transaction handle (spec §4.9): a thin constructor wrapper, since
//! [`Transaction`] itself already exposes the full stage/commit surface.

use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::protocol::command::RouteKey;
use crate::core::transaction::Transaction;

pub struct TransactionHandle {
    inner: Transaction,
}

impl TransactionHandle {
    pub fn new(client: &Client, deadline: Duration) -> Self {
        Self { inner: Transaction::new(client.executor().clone(), client.pubsub().clone(), deadline) }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub async fn stage(
        &mut self,
        key_name: &str,
        command: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        tentative_value: Option<Bytes>,
    ) -> Result<(), ClientError> {
        self.inner.stage(key_name, command, args, route, tentative_value).await
    }

    pub fn read_tentative(&self, key_name: &str) -> Option<&Bytes> {
        self.inner.read_tentative(key_name)
    }

    pub fn touch_local_cache(&mut self, collection_name: &str) {
        self.inner.touch_local_cache(collection_name)
    }

    pub async fn commit(self, response_timeout: Duration) -> Result<(), ClientError> {
        self.inner.commit(response_timeout).await
    }

    pub async fn rollback(self) {
        self.inner.rollback().await
    }
}
