//! The topology manager (C3, spec §4.2): discovers and maintains the set
//! of endpoints for single/replicated/sentinel/cluster modes behind one
//! abstract `entry_for_route`/`entries` interface.

pub mod cluster;
pub mod sentinel;
pub mod shard_entry;
pub mod static_topology;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::errors::ClientError;
use crate::core::protocol::decode::Redirect;

pub use shard_entry::{ReadMode, ShardEntry};

/// A pluggable DNS resolution hook (spec §6 `dnsMonitoringInterval`),
/// independently testable without a real resolver.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<SocketAddr>;
}

pub struct TokioDnsResolver;

#[async_trait]
impl DnsResolver for TokioDnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
    }
}

/// The abstract interface every topology mode exposes (spec §4.2
/// "Modes"). Single, replicated, sentinel, and cluster topologies all
/// implement this the same way so the command executor (C4) never has to
/// know which mode it's running under.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Resolves a routing key (cluster mode) to the shard-entry that owns
    /// it. `routing_key = None` means "any entry" (used by fixed-target
    /// commands like discovery pings).
    async fn entry_for_route(
        &self,
        routing_key: Option<&Bytes>,
        read_only: bool,
    ) -> Result<Arc<ShardEntry>, ClientError>;

    /// All currently known shard-entries, for commands that fan out
    /// (e.g. `entries()` callers in the eviction scheduler).
    fn entries(&self) -> Vec<Arc<ShardEntry>>;

    /// Applies a MOVED/ASK redirect and returns the shard-entry the
    /// command should be resent to. Non-cluster modes have nothing to
    /// redirect and treat this as a protocol error.
    async fn apply_redirect(&self, redirect: Redirect) -> Result<Arc<ShardEntry>, ClientError>;

    /// The configured read mode, consulted by the executor when choosing
    /// which of a shard-entry's pools to borrow from.
    fn read_mode(&self) -> ReadMode;
}
