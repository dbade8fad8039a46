// src/client.rs

//! `Client`/`ClientContext` (SPEC_FULL §B.1 "Global state"): the single
//! process-wide handle a caller builds once via [`Client::connect`],
//! owning the topology manager, the command executor, the pub/sub
//! service, and the background eviction scheduler (C8).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::{Config, ReadModeConfig, TopologyMode};
use crate::core::connection::{Endpoint, IdentityNatMapper, PoolConfig};
use crate::core::errors::ClientError;
use crate::core::eviction::{EvictionJob, EvictionScheduler, SchedulerHandle};
use crate::core::executor::{Executor, ExecutorConfig};
use crate::core::pubsub::PubSubService;
use crate::core::topology::cluster::ClusterTopology;
use crate::core::topology::sentinel::SentinelTopology;
use crate::core::topology::static_topology::StaticTopology;
use crate::core::topology::{ReadMode, Topology};
use crate::primitives::{
    BatchHandle, ExecutorServiceHandle, FairLockHandle, LockHandle, MapCacheHandle, PriorityQueueHandle, RateLimiterHandle,
    ReliableTopicHandle, SemaphoreHandle, TopicHandle, TransactionHandle,
};

fn parse_endpoint(raw: &str, tls: bool) -> Result<Endpoint, ClientError> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| ClientError::Config(format!("invalid endpoint '{raw}', expected host:port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ClientError::Config(format!("invalid port in endpoint '{raw}'")))?;
    Ok(Endpoint::new(host, port).with_tls(tls))
}

fn read_mode_of(mode: ReadModeConfig) -> ReadMode {
    match mode {
        ReadModeConfig::Primary => ReadMode::Primary,
        ReadModeConfig::Replica => ReadMode::Replica,
        ReadModeConfig::Any => ReadMode::Any,
    }
}

fn pool_config_of(config: &Config) -> PoolConfig {
    PoolConfig {
        max_active: config.connection.connection_pool_size,
        min_idle: config.connection.connection_min_idle,
        connect_timeout: config.connection.connect_timeout,
        idle_connection_timeout: config.connection.idle_connection_timeout,
        subscriptions_per_connection: config.connection.subscriptions_per_connection,
        connect_retry_attempts: config.connection.retry_attempts,
        tls_truststore_path: config.connection.tls.truststore_path.clone(),
    }
}

async fn build_topology(config: &Config) -> Result<Arc<dyn Topology>, ClientError> {
    let tls = config.connection.tls.enabled;
    let endpoints = config
        .topology
        .endpoints
        .iter()
        .map(|e| parse_endpoint(e, tls))
        .collect::<Result<Vec<_>, _>>()?;
    let read_mode = read_mode_of(config.topology.read_mode);
    let pool_config = pool_config_of(config);

    match config.topology.mode {
        TopologyMode::Single | TopologyMode::Replicated => {
            let mut endpoints = endpoints.into_iter();
            let primary = endpoints
                .next()
                .ok_or_else(|| ClientError::Config("topology.endpoints cannot be empty".into()))?;
            let replicas = endpoints.collect();
            Ok(Arc::new(StaticTopology::new(primary, replicas, read_mode, pool_config)))
        }
        TopologyMode::Sentinel => {
            let master_name = config
                .topology
                .master_name
                .clone()
                .ok_or_else(|| ClientError::Config("topology.masterName is required for sentinel mode".into()))?;
            let topology = SentinelTopology::connect(endpoints, master_name, read_mode, config.topology.scan_interval, pool_config).await?;
            Ok(topology as Arc<dyn Topology>)
        }
        TopologyMode::Cluster => {
            let topology = ClusterTopology::connect(
                endpoints,
                Arc::new(IdentityNatMapper),
                pool_config,
                read_mode,
                config.topology.check_slots_coverage,
                config.topology.scan_interval,
            )
            .await?;
            Ok(topology as Arc<dyn Topology>)
        }
    }
}

/// Process-wide client state. Cheap to clone (everything inside is
/// already `Arc`-backed); callers are expected to build one per process
/// and share it, not one per primitive.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientContext>,
}

struct ClientContext {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    config: Config,
    scheduler: SchedulerHandle,
    scheduler_shutdown: broadcast::Sender<()>,
}

impl Client {
    /// Builds the topology for `config.topology.mode`, wires the
    /// executor and pub/sub service on top of it, and starts the
    /// background eviction scheduler (C8) with no jobs registered —
    /// primitives register their own eviction/queue-transfer jobs via
    /// [`Client::register_eviction_job`] as they're constructed.
    pub async fn connect(config: Config) -> Result<Self, ClientError> {
        let topology = build_topology(&config).await?;
        let executor_config = ExecutorConfig {
            response_timeout: config.connection.response_timeout,
            retry_attempts: config.connection.retry_attempts,
            retry_interval: config.connection.retry_interval,
        };
        let executor = Arc::new(Executor::new(topology.clone(), executor_config));
        let pubsub = PubSubService::new(topology.clone());

        crate::core::metrics::TOPOLOGY_MODE.set(topology.entries().len() as f64);

        let (scheduler, scheduler_handle) = EvictionScheduler::new(config.topology.scan_interval);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(scheduler.run(shutdown_rx));

        info!(mode = ?config.topology.mode, "client connected");

        Ok(Self {
            inner: Arc::new(ClientContext {
                executor,
                pubsub,
                config,
                scheduler: scheduler_handle,
                scheduler_shutdown: shutdown_tx,
            }),
        })
    }

    /// Registers `job` to run every `interval` on the running eviction
    /// scheduler (C8). Primitives that need a periodic sweep (map-cache
    /// TTL/idle eviction, executor queue-transfer) call this on
    /// construction rather than requiring the caller to wire it up.
    pub fn register_eviction_job(&self, job: Arc<dyn EvictionJob>, interval: std::time::Duration) {
        self.inner.scheduler.register(job, interval);
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.inner.executor
    }

    pub fn pubsub(&self) -> &Arc<PubSubService> {
        &self.inner.pubsub
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Encodes pool utilization, retry, and redirect counters in the
    /// Prometheus text exposition format, for callers to serve on their
    /// own `/metrics` route.
    pub fn metrics(&self) -> String {
        crate::core::metrics::gather()
    }

    /// Builds a remote executor service named `name`.
    pub fn executor_service(&self, name: impl Into<String>) -> ExecutorServiceHandle {
        ExecutorServiceHandle::new(self, name)
    }

    pub fn lock(&self, name: impl Into<String>) -> LockHandle {
        LockHandle::new(self, name)
    }

    pub fn fair_lock(&self, name: impl Into<String>) -> FairLockHandle {
        FairLockHandle::new(self, name)
    }

    pub fn semaphore(&self, name: impl Into<String>) -> SemaphoreHandle {
        SemaphoreHandle::new(self, name)
    }

    pub fn map_cache(&self, name: impl Into<String>) -> MapCacheHandle {
        MapCacheHandle::new(self, name)
    }

    pub fn rate_limiter(&self, name: impl Into<String>, max_tokens: u64, rate: u64, interval: std::time::Duration) -> RateLimiterHandle {
        RateLimiterHandle::new(self, name, max_tokens, rate, interval)
    }

    pub fn priority_queue(&self, name: impl Into<String>) -> PriorityQueueHandle {
        PriorityQueueHandle::new(self, name)
    }

    pub fn topic(&self, name: impl Into<String>) -> TopicHandle {
        TopicHandle::new(self, name)
    }

    pub fn reliable_topic(&self, name: impl Into<String>) -> ReliableTopicHandle {
        ReliableTopicHandle::new(self, name)
    }

    pub fn batch(&self, mode: crate::core::batch::ExecutionMode) -> BatchHandle {
        BatchHandle::new(self, mode)
    }

    pub fn transaction(&self, deadline: std::time::Duration) -> TransactionHandle {
        TransactionHandle::new(self, deadline)
    }

    /// Stops the background eviction scheduler. Pools and pub/sub
    /// connections are left to drop naturally with the last `Client`
    /// clone.
    pub fn shutdown(&self) {
        let _ = self.inner.scheduler_shutdown.send(());
    }
}

