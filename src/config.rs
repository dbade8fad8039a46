// src/config.rs

//! Loads and validates the client configuration: connection, topology,
//! executor, and batch tunables (spec §6 "Configured options").

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A simple wrapper to allow sharing the config behind a mutex once loaded.
pub trait IntoMutex: Sized {
    fn into_mutex(self) -> Arc<Mutex<Self>>;
}

impl IntoMutex for Config {
    fn into_mutex(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }
}

/// Topology discovery mode (spec §6 "topology: mode").
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    #[default]
    Single,
    Replicated,
    Sentinel,
    Cluster,
}

/// How read-only commands pick between a shard's primary and replicas.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadModeConfig {
    #[default]
    Primary,
    Replica,
    Any,
}

/// Which pool subscribe connections are drawn from in cluster mode.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionModeConfig {
    #[default]
    Primary,
    Replica,
}

/// How a batch is shipped to the server (spec §4.5 "Modes").
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionModeConfig {
    #[default]
    PipelinedInMemory,
    PipelinedAtomic,
    SkipResult,
}

/// TLS connection options (spec §6 `connection.tls` + {truststore,
/// keystore, endpointIdentification}).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub truststore_path: Option<String>,
    #[serde(default)]
    pub keystore_path: Option<String>,
    #[serde(default = "default_true")]
    pub endpoint_identification: bool,
}

fn default_true() -> bool {
    true
}

/// Connection-pool and per-socket tunables (spec §6 "connection:").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionConfig {
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,
    #[serde(default = "default_connection_min_idle")]
    pub connection_min_idle: usize,
    #[serde(default = "default_subscription_pool_size")]
    pub subscription_pool_size: usize,
    #[serde(default = "default_subscriptions_per_connection")]
    pub subscriptions_per_connection: usize,
    #[serde(with = "humantime_serde", default = "default_idle_connection_timeout")]
    pub idle_connection_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_response_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_interval() -> Duration {
    Duration::from_millis(1500)
}
fn default_connection_pool_size() -> usize {
    64
}
fn default_connection_min_idle() -> usize {
    8
}
fn default_subscription_pool_size() -> usize {
    50
}
fn default_subscriptions_per_connection() -> usize {
    5
}
fn default_idle_connection_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_ping_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            response_timeout: default_response_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_interval: default_retry_interval(),
            connection_pool_size: default_connection_pool_size(),
            connection_min_idle: default_connection_min_idle(),
            subscription_pool_size: default_subscription_pool_size(),
            subscriptions_per_connection: default_subscriptions_per_connection(),
            idle_connection_timeout: default_idle_connection_timeout(),
            ping_interval: default_ping_interval(),
            keep_alive: true,
            tcp_no_delay: true,
            tls: TlsConfig::default(),
        }
    }
}

/// Topology discovery tunables (spec §6 "topology:").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mode: TopologyMode,
    #[serde(default)]
    pub read_mode: ReadModeConfig,
    #[serde(default)]
    pub subscription_mode: SubscriptionModeConfig,
    #[serde(with = "humantime_serde", default = "default_scan_interval")]
    pub scan_interval: Duration,
    #[serde(default = "default_true")]
    pub check_slots_coverage: bool,
    #[serde(with = "humantime_serde", default = "default_dns_monitoring_interval")]
    pub dns_monitoring_interval: Duration,
    /// `host:port` pairs the topology is seeded from.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// The primary's name as known to the sentinels. Required when `mode
    /// = "sentinel"`.
    #[serde(default)]
    pub master_name: Option<String>,
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_dns_monitoring_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            mode: TopologyMode::default(),
            read_mode: ReadModeConfig::default(),
            subscription_mode: SubscriptionModeConfig::default(),
            scan_interval: default_scan_interval(),
            check_slots_coverage: true,
            dns_monitoring_interval: default_dns_monitoring_interval(),
            endpoints: vec!["127.0.0.1:6379".to_string()],
            master_name: None,
        }
    }
}

/// Remote-executor tunables (spec §6 "executor:").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutorServiceConfig {
    #[serde(with = "humantime_serde", default = "default_task_retry_interval")]
    pub task_retry_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_task_timeout")]
    pub task_timeout: Duration,
}

fn default_task_retry_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ExecutorServiceConfig {
    fn default() -> Self {
        Self {
            task_retry_interval: default_task_retry_interval(),
            task_timeout: default_task_timeout(),
        }
    }
}

/// Batch-engine tunables (spec §6 "batch:").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchConfig {
    #[serde(default)]
    pub execution_mode: ExecutionModeConfig,
    #[serde(default)]
    pub sync_replicas: u32,
    #[serde(with = "humantime_serde", default = "default_sync_timeout")]
    pub sync_timeout: Duration,
    #[serde(default)]
    pub skip_result: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionModeConfig::default(),
            sync_replicas: 0,
            sync_timeout: default_sync_timeout(),
            skip_result: false,
            retry_attempts: default_retry_attempts(),
            retry_interval: default_retry_interval(),
        }
    }
}

/// The final, validated client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevelConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub executor: ExecutorServiceConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogLevelConfig(pub String);

impl Default for LogLevelConfig {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl Config {
    /// Loads and validates a config from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates logical consistency of the resolved configuration.
    fn validate(&self) -> Result<()> {
        if self.topology.endpoints.is_empty() {
            return Err(anyhow!("topology.endpoints cannot be empty"));
        }
        if self.topology.mode == TopologyMode::Sentinel && self.topology.master_name.is_none() {
            return Err(anyhow!("topology.masterName is required when topology.mode = \"sentinel\""));
        }
        if self.connection.connection_pool_size == 0 {
            return Err(anyhow!("connection.connectionPoolSize cannot be 0"));
        }
        if self.connection.connection_min_idle > self.connection.connection_pool_size {
            return Err(anyhow!(
                "connection.connectionMinIdle cannot exceed connection.connectionPoolSize"
            ));
        }
        if self.connection.subscriptions_per_connection == 0 {
            return Err(anyhow!("connection.subscriptionsPerConnection cannot be 0"));
        }
        if self.connection.tls.enabled && self.connection.tls.truststore_path.is_none() {
            warn!(
                "connection.tls is enabled with no truststore configured; falling back to the platform's default root store"
            );
        }
        if self.batch.sync_replicas > 0 && self.batch.sync_timeout.is_zero() {
            return Err(anyhow!(
                "batch.syncTimeout must be greater than 0 when batch.syncReplicas is set"
            ));
        }
        if self.executor.task_timeout.is_zero() {
            return Err(anyhow!("executor.taskTimeout cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let mut config = Config::default();
        config.topology.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_idle_above_pool_size_is_rejected() {
        let mut config = Config::default();
        config.connection.connection_min_idle = config.connection.connection_pool_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trips_through_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orbiter.toml");
        fs::write(&path, "[topology]\nendpoints = [\"10.0.0.1:6379\"]\n").unwrap();
        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.topology.endpoints, vec!["10.0.0.1:6379".to_string()]);
        assert_eq!(config.connection.connection_pool_size, default_connection_pool_size());
    }
}
