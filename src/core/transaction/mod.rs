//! Transactions (C10, spec §4.9): staged operations guarded by per-key
//! reentrant locks, local-cache coherence announcements, and a single
//! atomic commit pipeline built on the batch engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

use crate::core::batch::{Batch, ExecutionMode};
use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::pubsub::PubSubService;
use crate::core::scripts::lock::Lock;

struct StagedOperation {
    name: &'static str,
    args: Vec<Bytes>,
    route: RouteKey,
}

/// One in-flight transaction (spec §4.9). Every mutating call on a
/// transactional collection goes through [`Transaction::stage`], which
/// acquires the per-key lock, records the operation, and updates the
/// tentative view reads within the same transaction see.
pub struct Transaction {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    id: String,
    deadline: Instant,
    lease: Duration,
    locks: HashMap<String, Lock>,
    staged: Vec<StagedOperation>,
    tentative: HashMap<String, Bytes>,
    local_caches: HashSet<String>,
}

impl Transaction {
    /// `deadline` doubles as the lease handed to every per-key lock this
    /// transaction acquires (spec §4.9 "the transaction's deadline as
    /// lease").
    pub fn new(executor: Arc<Executor>, pubsub: Arc<PubSubService>, deadline: Duration) -> Self {
        Self {
            executor,
            pubsub,
            id: Uuid::new_v4().simple().to_string(),
            deadline: Instant::now() + deadline,
            lease: deadline,
            locks: HashMap::new(),
            staged: Vec::new(),
            tentative: HashMap::new(),
            local_caches: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn ack_channel(&self) -> Bytes {
        Bytes::copy_from_slice(keys::channel(&format!("txn:{}", self.id)).as_bytes())
    }

    /// Stages one mutating command against `key_name`: acquires the
    /// per-key lock if this transaction doesn't already hold it, records
    /// the operation for the commit pipeline, and — if `tentative_value`
    /// is given — updates the view later reads in this transaction see
    /// (spec §4.9 (a)/(b)/(c)).
    pub async fn stage(
        &mut self,
        key_name: &str,
        command: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        tentative_value: Option<Bytes>,
    ) -> Result<(), ClientError> {
        if Instant::now() >= self.deadline {
            return Err(ClientError::TransactionTimeout);
        }

        if !self.locks.contains_key(key_name) {
            let mut lock = Lock::new(self.executor.clone(), self.pubsub.clone(), key_name, self.id.clone(), self.lease);
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if !lock.acquire(remaining).await? {
                return Err(ClientError::TransactionTimeout);
            }
            self.locks.insert(key_name.to_string(), lock);
        }

        self.staged.push(StagedOperation { name: command, args, route });
        if let Some(value) = tentative_value {
            self.tentative.insert(key_name.to_string(), value);
        }
        Ok(())
    }

    /// Returns this transaction's own pending write to `key_name`, if
    /// any — reads inside a transaction must see its own uncommitted
    /// writes (spec §4.9 (c)).
    pub fn read_tentative(&self, key_name: &str) -> Option<&Bytes> {
        self.tentative.get(key_name)
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Marks `collection_name` as carrying a local cache whose readers
    /// must suspend for the duration of the commit (spec §4.9
    /// "Local-cache coherence").
    pub fn touch_local_cache(&mut self, collection_name: &str) {
        self.local_caches.insert(collection_name.to_string());
    }

    /// Publishes a disable announcement on every touched local-cache
    /// collection's topic and waits for an ack from each, ships the
    /// staged operations as a single atomic batch, then publishes an
    /// enable announcement and releases every held lock. A failure at
    /// any stage rolls the transaction back the same way
    /// [`Transaction::rollback`] does.
    pub async fn commit(mut self, response_timeout: Duration) -> Result<(), ClientError> {
        if let Err(e) = self.announce_and_await_acks(response_timeout).await {
            self.release_locks().await;
            let _ = self.publish_enable().await;
            return Err(e);
        }

        let mut batch = Batch::new(self.executor.clone(), ExecutionMode::PipelinedAtomic);
        for op in self.staged.drain(..) {
            batch.enqueue(op.name, op.args, op.route);
        }
        let outcome = batch.execute().await;

        self.release_locks().await;
        let _ = self.publish_enable().await;

        outcome.map(|_| ())
    }

    /// Discards every staged operation, releases held locks, and
    /// publishes the enable announcement immediately (spec §4.9 "On
    /// rollback, enable is published immediately").
    pub async fn rollback(mut self) {
        let _ = self.publish_enable().await;
        self.release_locks().await;
    }

    async fn announce_and_await_acks(&self, response_timeout: Duration) -> Result<(), ClientError> {
        if self.local_caches.is_empty() {
            return Ok(());
        }

        let ack_channel = self.ack_channel();
        let mut subscription = self.pubsub.subscribe(ack_channel.clone()).await?;
        let mut pending: HashSet<String> = self.local_caches.clone();

        for collection in &self.local_caches {
            self.publish_announcement(collection, b"disable", &ack_channel).await?;
        }

        let deadline = Instant::now() + response_timeout;
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::TransactionTimeout);
            }
            match tokio::time::timeout(remaining, subscription.recv()).await {
                Ok(Ok(message)) => {
                    pending.remove(&String::from_utf8_lossy(&message.payload).into_owned());
                }
                Ok(Err(e)) => return Err(ClientError::Protocol(format!("ack channel closed: {e}"))),
                Err(_) => return Err(ClientError::TransactionTimeout),
            }
        }
        Ok(())
    }

    async fn publish_enable(&self) -> Result<(), ClientError> {
        let ack_channel = self.ack_channel();
        for collection in &self.local_caches {
            self.publish_announcement(collection, b"enable", &ack_channel).await?;
        }
        Ok(())
    }

    async fn publish_announcement(&self, collection: &str, kind: &'static [u8], ack_channel: &Bytes) -> Result<(), ClientError> {
        let channel = Bytes::copy_from_slice(keys::channel(collection).as_bytes());
        let mut payload = Vec::with_capacity(kind.len() + 1 + self.id.len() + 1 + ack_channel.len());
        payload.extend_from_slice(kind);
        payload.push(b':');
        payload.extend_from_slice(self.id.as_bytes());
        payload.push(b':');
        payload.extend_from_slice(ack_channel);
        self.executor
            .send_raw("PUBLISH", vec![channel.clone(), Bytes::from(payload)], RouteKey::Key(channel), false)
            .await?;
        Ok(())
    }

    async fn release_locks(&mut self) {
        for (_, mut lock) in self.locks.drain() {
            let _ = lock.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tentative_writes_are_visible_before_commit() {
        let mut tentative = HashMap::new();
        tentative.insert("k".to_string(), Bytes::from_static(b"v"));
        assert_eq!(tentative.get("k"), Some(&Bytes::from_static(b"v")));
    }

    #[test]
    fn ack_channel_is_scoped_per_transaction_id() {
        assert_ne!(keys::channel("txn:a"), keys::channel("txn:b"));
    }
}
