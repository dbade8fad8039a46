//! The pub/sub subscription service (C5, spec §4.4): shared subscription
//! entries, reference-counted listener registration, and reconnection
//! replay. Built on [`SubscribeConnection`] rather than the generic
//! connection pool, since subscribe-role sockets carry unsolicited
//! pushes that the pool's request/reply model can't represent.

pub mod subscribe_connection;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::warn;

pub use subscribe_connection::PubSubMessage;
use subscribe_connection::SubscribeConnection;

use crate::core::connection::Endpoint;
use crate::core::errors::ClientError;
use crate::core::topology::Topology;

const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct PubSubService {
    topology: Arc<dyn Topology>,
    connections: Arc<DashMap<Endpoint, Arc<SubscribeConnection>>>,
    listener_counts: DashMap<Bytes, Arc<AtomicUsize>>,
    pattern_listener_counts: DashMap<Bytes, Arc<AtomicUsize>>,
    fairness: DashMap<Bytes, Arc<AsyncMutex<()>>>,
}

impl PubSubService {
    pub fn new(topology: Arc<dyn Topology>) -> Arc<Self> {
        Arc::new(Self {
            topology,
            connections: Arc::new(DashMap::new()),
            listener_counts: DashMap::new(),
            pattern_listener_counts: DashMap::new(),
            fairness: DashMap::new(),
        })
    }

    fn fairness_lock(&self, key: &Bytes) -> Arc<AsyncMutex<()>> {
        self.fairness.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn connection_for(&self, routing_key: &Bytes) -> Result<Arc<SubscribeConnection>, ClientError> {
        let entry = self.topology.entry_for_route(Some(routing_key), false).await?;
        let endpoint = entry.primary();
        if let Some(conn) = self.connections.get(&endpoint)
            && !conn.is_closed()
        {
            return Ok(conn.value().clone());
        }
        let conn = SubscribeConnection::connect(endpoint.clone()).await?;
        self.connections.insert(endpoint.clone(), conn.clone());
        tokio::spawn(reconnect_watcher(self.connections.clone(), endpoint));
        Ok(conn)
    }

    /// Subscribes to an exact channel name (spec §4.4 "Registration").
    pub async fn subscribe(self: &Arc<Self>, channel: impl Into<Bytes>) -> Result<Subscription, ClientError> {
        let channel = channel.into();
        let fairness_lock = self.fairness_lock(&channel);
        let _guard = fairness_lock.lock().await;
        let conn = self.connection_for(&channel).await?;
        let receiver = conn.subscribe(channel.clone()).await?;
        let count = self
            .listener_counts
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        count.fetch_add(1, Ordering::AcqRel);
        Ok(Subscription {
            service: self.clone(),
            name: channel,
            pattern: false,
            receiver,
            count,
        })
    }

    /// Subscribes to a glob pattern (spec §4.4 "Pattern subscribe").
    pub async fn psubscribe(self: &Arc<Self>, pattern: impl Into<Bytes>) -> Result<Subscription, ClientError> {
        let pattern = pattern.into();
        let fairness_lock = self.fairness_lock(&pattern);
        let _guard = fairness_lock.lock().await;
        let conn = self.connection_for(&pattern).await?;
        let receiver = conn.psubscribe(pattern.clone()).await?;
        let count = self
            .pattern_listener_counts
            .entry(pattern.clone())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        count.fetch_add(1, Ordering::AcqRel);
        Ok(Subscription {
            service: self.clone(),
            name: pattern,
            pattern: true,
            receiver,
            count,
        })
    }

    async fn unsubscribe_internal(&self, channel: &Bytes) {
        let fairness_lock = self.fairness_lock(channel);
        let _guard = fairness_lock.lock().await;
        for conn in self.connections.iter() {
            let _ = conn.unsubscribe(channel).await;
        }
        self.listener_counts.remove(channel);
    }

    async fn punsubscribe_internal(&self, pattern: &Bytes) {
        let fairness_lock = self.fairness_lock(pattern);
        let _guard = fairness_lock.lock().await;
        for conn in self.connections.iter() {
            let _ = conn.punsubscribe(pattern).await;
        }
        self.pattern_listener_counts.remove(pattern);
    }
}

/// Watches one subscribe connection; once it's closed, opens a fresh one
/// to the same endpoint and replays every channel/pattern it used to
/// carry, in deterministic name order, before any pending unsubscribes
/// (spec §4.4 "Reconnection").
async fn reconnect_watcher(connections: Arc<DashMap<Endpoint, Arc<SubscribeConnection>>>, endpoint: Endpoint) {
    loop {
        let Some(conn) = connections.get(&endpoint).map(|e| e.value().clone()) else {
            return;
        };
        while !conn.is_closed() {
            tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
        }
        if conn.subscription_count() == 0 {
            connections.remove(&endpoint);
            return;
        }
        match SubscribeConnection::connect(endpoint.clone()).await {
            Ok(fresh) => {
                fresh.adopt_senders(conn.snapshot_channel_senders(), conn.snapshot_pattern_senders());
                if let Err(e) = fresh.replay().await {
                    warn!(%endpoint, "subscription replay failed after reconnect: {e}");
                }
                connections.insert(endpoint.clone(), fresh);
            }
            Err(e) => {
                warn!(%endpoint, "subscribe reconnect failed, retrying: {e}");
                tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
            }
        }
    }
}

/// A live subscription. Dropping the last clone for a given
/// channel/pattern name triggers an UNSUBSCRIBE (spec §4.4
/// "Unsubscribe").
pub struct Subscription {
    service: Arc<PubSubService>,
    name: Bytes,
    pattern: bool,
    receiver: broadcast::Receiver<PubSubMessage>,
    count: Arc<AtomicUsize>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<PubSubMessage, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            let service = self.service.clone();
            let name = self.name.clone();
            let pattern = self.pattern;
            tokio::spawn(async move {
                if pattern {
                    service.punsubscribe_internal(&name).await;
                } else {
                    service.unsubscribe_internal(&name).await;
                }
            });
        }
    }
}
