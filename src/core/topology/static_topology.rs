//! Single and replicated topology modes (spec §4.2 "Single, replicated").
//! Both are one fixed [`ShardEntry`] for the whole keyspace; the only
//! difference between them is whether the configured replica list is
//! empty, which `ShardEntry` already handles uniformly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::connection::{Endpoint, PoolConfig};
use crate::core::errors::ClientError;
use crate::core::protocol::decode::Redirect;
use crate::core::topology::{ReadMode, ShardEntry, Topology};

pub struct StaticTopology {
    entry: Arc<ShardEntry>,
    read_mode: ReadMode,
}

impl StaticTopology {
    pub fn new(primary: Endpoint, replicas: Vec<Endpoint>, read_mode: ReadMode, pool_config: PoolConfig) -> Self {
        Self {
            entry: Arc::new(ShardEntry::new(primary, replicas, pool_config)),
            read_mode,
        }
    }
}

#[async_trait]
impl Topology for StaticTopology {
    async fn entry_for_route(
        &self,
        _routing_key: Option<&Bytes>,
        read_only: bool,
    ) -> Result<Arc<ShardEntry>, ClientError> {
        let _ = read_only;
        Ok(self.entry.clone())
    }

    fn entries(&self) -> Vec<Arc<ShardEntry>> {
        vec![self.entry.clone()]
    }

    async fn apply_redirect(&self, _redirect: Redirect) -> Result<Arc<ShardEntry>, ClientError> {
        Err(ClientError::Protocol(
            "received a cluster redirect outside of cluster mode".into(),
        ))
    }

    fn read_mode(&self) -> ReadMode {
        self.read_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_for_route_always_returns_the_single_entry() {
        let topo = StaticTopology::new(
            Endpoint::new("127.0.0.1", 6379),
            vec![],
            ReadMode::Primary,
            PoolConfig::default(),
        );
        let entry = topo.entry_for_route(None, true).await.unwrap();
        assert_eq!(entry.primary(), Endpoint::new("127.0.0.1", 6379));
    }

    #[tokio::test]
    async fn redirects_are_rejected_outside_cluster_mode() {
        let topo = StaticTopology::new(Endpoint::new("127.0.0.1", 6379), vec![], ReadMode::Primary, PoolConfig::default());
        let err = match topo
            .apply_redirect(Redirect::Moved { slot: 0, addr: "x:1".into() })
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
