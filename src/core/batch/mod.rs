//! The batch engine (C6, spec §4.5): records deferred commands, ships
//! them pipelined or atomically, collects typed results, and optionally
//! waits for replica sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::{ReplyOutcome, classify};
use crate::core::protocol::resp::RespFrame;
use crate::core::topology::cluster::slot::get_slot;

/// How a batch is shipped to the server (spec §4.5 "Modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Descriptors stay client-side until `execute`, then are grouped by
    /// shard and sent back-to-back on one connection per shard.
    PipelinedInMemory,
    /// Each shard's group is wrapped in server-side MULTI/EXEC framing.
    PipelinedAtomic,
    /// Same as pipelined, but results are discarded (server hint only).
    SkipResult,
}

#[derive(Debug, Clone)]
pub struct ReplicaSync {
    pub replica_count: u32,
    pub sync_timeout: Duration,
}

struct Descriptor {
    name: &'static str,
    args: Vec<Bytes>,
    route: RouteKey,
    completion: oneshot::Sender<Result<RespFrame, ClientError>>,
}

/// A single outcome slot for one enqueued operation, resolved once
/// `execute` runs. Cancelling it before `execute` removes the descriptor
/// (spec §4.5 "Deferred futures"); after `execute` it is a no-op since
/// the command has already been sent.
pub struct Deferred {
    receiver: oneshot::Receiver<Result<RespFrame, ClientError>>,
}

impl Deferred {
    pub async fn wait(self) -> Result<RespFrame, ClientError> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(ClientError::Rejected("batch cancelled before execute".into())))
    }
}

pub struct BatchResult {
    pub synced_replicas: Option<u32>,
}

/// Accumulates descriptors client-side; `execute` ships them per the
/// configured mode and resolves every outstanding [`Deferred`].
pub struct Batch {
    executor: Arc<Executor>,
    mode: ExecutionMode,
    replica_sync: Option<ReplicaSync>,
    descriptors: Vec<Descriptor>,
}

impl Batch {
    pub fn new(executor: Arc<Executor>, mode: ExecutionMode) -> Self {
        Self { executor, mode, replica_sync: None, descriptors: Vec::new() }
    }

    pub fn with_replica_sync(mut self, sync: ReplicaSync) -> Self {
        self.replica_sync = Some(sync);
        self
    }

    /// Enqueues one command, returning a future resolved during
    /// `execute`.
    pub fn enqueue(&mut self, name: &'static str, args: Vec<Bytes>, route: RouteKey) -> Deferred {
        let (tx, rx) = oneshot::channel();
        self.descriptors.push(Descriptor { name, args, route, completion: tx });
        Deferred { receiver: rx }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Ships every enqueued descriptor and resolves each one's
    /// [`Deferred`]. Transport errors fail the entire batch with the
    /// first error (spec §4.5 "Error policy"); in atomic mode a single
    /// server-reported error aborts the whole group.
    pub async fn execute(mut self) -> Result<BatchResult, ClientError> {
        let groups = self.group_by_shard();

        for (_, group) in groups {
            match self.mode {
                ExecutionMode::PipelinedInMemory | ExecutionMode::SkipResult => {
                    self.execute_pipelined(group).await?;
                }
                ExecutionMode::PipelinedAtomic => {
                    self.execute_atomic(group).await?;
                }
            }
        }

        let synced_replicas = match &self.replica_sync {
            Some(sync) => Some(self.wait_for_replicas(sync).await?),
            None => None,
        };

        Ok(BatchResult { synced_replicas })
    }

    /// Groups descriptors by the slot their routing key hashes to (or a
    /// single implicit group for non-cluster routes), preserving
    /// per-group submission order.
    fn group_by_shard(&mut self) -> Vec<(Option<u16>, Vec<Descriptor>)> {
        let mut groups: HashMap<Option<u16>, Vec<Descriptor>> = HashMap::new();
        let mut order: Vec<Option<u16>> = Vec::new();
        for descriptor in self.descriptors.drain(..) {
            let slot = match &descriptor.route {
                RouteKey::Key(k) => Some(get_slot(k)),
                RouteKey::Fixed(_) => None,
            };
            if !groups.contains_key(&slot) {
                order.push(slot);
            }
            groups.entry(slot).or_default().push(descriptor);
        }
        order.into_iter().map(|slot| (slot, groups.remove(&slot).unwrap_or_default())).collect()
    }

    async fn execute_pipelined(&self, group: Vec<Descriptor>) -> Result<(), ClientError> {
        let skip_result = self.mode == ExecutionMode::SkipResult;
        for descriptor in group {
            let route = descriptor.route.clone();
            let result = self.executor.send_raw(descriptor.name, descriptor.args, route, false).await;
            if !skip_result {
                let _ = descriptor.completion.send(result);
            } else {
                let _ = descriptor.completion.send(result.map(|_| RespFrame::SimpleString("OK".into())));
            }
        }
        Ok(())
    }

    /// Wraps one shard's group in server-side MULTI/EXEC framing on a
    /// single borrowed connection, so the group commits atomically on
    /// that shard (spec §4.5 "Pipelined atomic").
    async fn execute_atomic(&self, group: Vec<Descriptor>) -> Result<(), ClientError> {
        let routing_key = group.first().and_then(|d| match &d.route {
            RouteKey::Key(k) => Some(k.clone()),
            RouteKey::Fixed(_) => None,
        });

        let entry = self.executor.topology().entry_for_route(routing_key.as_ref(), false).await;
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                for descriptor in group {
                    let _ = descriptor.completion.send(Err(e.clone()));
                }
                return Err(e);
            }
        };
        let pool = entry.write_pool();

        let conn = match pool.acquire(self.executor.config().response_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                for descriptor in group {
                    let _ = descriptor.completion.send(Err(e.clone()));
                }
                return Err(e);
            }
        };

        let outcome = self.run_multi_exec(&conn, &group).await;
        pool.release(conn);

        match outcome {
            Ok(results) => {
                for (descriptor, result) in group.into_iter().zip(results) {
                    let _ = descriptor.completion.send(Ok(result));
                }
                Ok(())
            }
            Err(e) => {
                for descriptor in group {
                    let _ = descriptor.completion.send(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    async fn run_multi_exec(
        &self,
        conn: &crate::core::connection::Connection,
        group: &[Descriptor],
    ) -> Result<Vec<RespFrame>, ClientError> {
        conn.send(RespFrame::command("MULTI", Vec::<Bytes>::new())).await?;

        for descriptor in group {
            let queued = conn.send(RespFrame::command(descriptor.name, descriptor.args.iter().cloned())).await?;
            if let ReplyOutcome::ServerError(msg) = classify(queued) {
                let _ = conn.send(RespFrame::command("DISCARD", Vec::<Bytes>::new())).await;
                return Err(ClientError::Server(msg));
            }
        }

        let reply = conn.send(RespFrame::command("EXEC", Vec::<Bytes>::new())).await?;
        match reply {
            RespFrame::Array(results) if results.len() == group.len() => Ok(results),
            RespFrame::NullArray | RespFrame::Null => {
                Err(ClientError::TransactionAborted)
            }
            other => Err(ClientError::Protocol(format!("unexpected EXEC reply shape: {other:?}"))),
        }
    }

    async fn wait_for_replicas(&self, sync: &ReplicaSync) -> Result<u32, ClientError> {
        let reply = tokio::time::timeout(
            sync.sync_timeout,
            self.executor.send_raw(
                "WAIT",
                vec![
                    Bytes::copy_from_slice(sync.replica_count.to_string().as_bytes()),
                    Bytes::copy_from_slice(sync.sync_timeout.as_millis().to_string().as_bytes()),
                ],
                RouteKey::Fixed("replica-sync".into()),
                false,
            ),
        )
        .await
        .map_err(|_| ClientError::WaitTimeout)??;

        match reply {
            RespFrame::Integer(n) => Ok(n as u32),
            other => Err(ClientError::Protocol(format!("expected integer WAIT reply, got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::ExecutorConfig;
    use crate::core::topology::{ReadMode, ShardEntry};
    use async_trait::async_trait;
    use crate::core::topology::Topology;
    use crate::core::protocol::decode::Redirect;

    struct NoOpTopology;

    #[async_trait]
    impl Topology for NoOpTopology {
        async fn entry_for_route(&self, _k: Option<&Bytes>, _r: bool) -> Result<Arc<ShardEntry>, ClientError> {
            Err(ClientError::CantConnect)
        }
        fn entries(&self) -> Vec<Arc<ShardEntry>> {
            Vec::new()
        }
        async fn apply_redirect(&self, _r: Redirect) -> Result<Arc<ShardEntry>, ClientError> {
            Err(ClientError::CantConnect)
        }
        fn read_mode(&self) -> ReadMode {
            ReadMode::Primary
        }
    }

    fn batch() -> Batch {
        let executor = Arc::new(Executor::new(Arc::new(NoOpTopology), ExecutorConfig::default()));
        Batch::new(executor, ExecutionMode::PipelinedInMemory)
    }

    #[test]
    fn enqueue_tracks_pending_descriptor_count() {
        let mut b = batch();
        assert!(b.is_empty());
        b.enqueue("SET", vec![Bytes::from_static(b"k")], RouteKey::Key(Bytes::from_static(b"k")));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn group_by_shard_preserves_order_within_a_group() {
        let mut b = batch();
        b.enqueue("SET", vec![Bytes::from_static(b"a")], RouteKey::Key(Bytes::from_static(b"a")));
        b.enqueue("SET", vec![Bytes::from_static(b"b")], RouteKey::Key(Bytes::from_static(b"a")));
        let groups = b.group_by_shard();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[tokio::test]
    async fn dropping_a_batch_before_execute_fails_its_deferreds() {
        let mut b = batch();
        let deferred = b.enqueue("SET", vec![Bytes::from_static(b"a")], RouteKey::Key(Bytes::from_static(b"a")));
        drop(b);
        assert!(deferred.wait().await.is_err());
    }
}
