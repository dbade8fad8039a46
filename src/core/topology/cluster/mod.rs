//! Cluster topology (spec §4.2 "Cluster discovery", "Ongoing
//! reconciliation", "Redirects"): the sharded, 16384-slot mode.

pub mod discovery;
pub mod slot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::core::connection::{Connection, Endpoint, NatMapper, PoolConfig};
use crate::core::errors::ClientError;
use crate::core::protocol::decode::{Redirect, decode_bulk};
use crate::core::protocol::resp::RespFrame;
use crate::core::topology::cluster::discovery::{Partition, parse_cluster_nodes};
use crate::core::topology::cluster::slot::{NUM_SLOTS, get_slot};
use crate::core::topology::{ReadMode, ShardEntry, Topology};

pub struct ClusterTopology {
    slots: RwLock<Vec<Option<Arc<ShardEntry>>>>,
    entries_by_endpoint: RwLock<HashMap<Endpoint, Arc<ShardEntry>>>,
    seeds: RwLock<Vec<Endpoint>>,
    nat_mapper: Arc<dyn NatMapper>,
    pool_config: PoolConfig,
    read_mode: ReadMode,
    check_slots_coverage: bool,
}

impl ClusterTopology {
    pub async fn connect(
        seeds: Vec<Endpoint>,
        nat_mapper: Arc<dyn NatMapper>,
        pool_config: PoolConfig,
        read_mode: ReadMode,
        check_slots_coverage: bool,
        scan_interval: Duration,
    ) -> Result<Arc<Self>, ClientError> {
        let topology = Arc::new(Self {
            slots: RwLock::new(vec![None; NUM_SLOTS]),
            entries_by_endpoint: RwLock::new(HashMap::new()),
            seeds: RwLock::new(seeds),
            nat_mapper,
            pool_config,
            read_mode,
            check_slots_coverage,
        });

        topology.discover().await?;

        let reconciler = topology.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.discover().await {
                    warn!("cluster reconciliation failed: {e}");
                }
            }
        });

        Ok(topology)
    }

    /// Fetches `CLUSTER NODES` from the first reachable node — a seed on
    /// startup, or any currently known primary on later reconciliation
    /// passes — and installs the resulting partitions.
    async fn discover(&self) -> Result<(), ClientError> {
        let candidates: Vec<Endpoint> = {
            let known: Vec<Endpoint> = self.entries_by_endpoint.read().keys().cloned().collect();
            if known.is_empty() { self.seeds.read().clone() } else { known }
        };

        let mut partitions = None;
        for endpoint in &candidates {
            match fetch_cluster_nodes(endpoint).await {
                Ok(p) if !p.is_empty() => {
                    partitions = Some(p);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(%endpoint, "cluster nodes probe failed: {e}");
                    continue;
                }
            }
        }
        let partitions = partitions.ok_or(ClientError::CantConnect)?;

        if self.check_slots_coverage {
            let covered: u32 = partitions.iter().map(Partition::total_slots).sum();
            if covered != NUM_SLOTS as u32 {
                return Err(ClientError::SlotsNotCovered);
            }
        }

        self.install(partitions);
        Ok(())
    }

    fn install(&self, partitions: Vec<Partition>) {
        let mut entries = self.entries_by_endpoint.write();
        let mut new_slots: Vec<Option<Arc<ShardEntry>>> = vec![None; NUM_SLOTS];

        for partition in &partitions {
            let primary = self.nat_mapper.map(partition.primary.clone());
            let replicas: Vec<Endpoint> = partition
                .replicas
                .iter()
                .map(|r| self.nat_mapper.map(r.clone()))
                .collect();

            let entry = entries
                .entry(primary.clone())
                .and_modify(|existing| {
                    if existing.replicas() != replicas {
                        existing.set_replicas(replicas.clone());
                    }
                })
                .or_insert_with(|| Arc::new(ShardEntry::new(primary.clone(), replicas.clone(), self.pool_config.clone())))
                .clone();

            for &(start, end) in &partition.slots {
                for slot in start..=end {
                    new_slots[slot as usize] = Some(entry.clone());
                }
            }
        }

        entries.retain(|endpoint, _| partitions.iter().any(|p| &p.primary == endpoint));
        *self.slots.write() = new_slots;
        info!(partitions = partitions.len(), "installed cluster topology");
    }

    fn entry_for_endpoint(&self, endpoint: &Endpoint) -> Arc<ShardEntry> {
        self.entries_by_endpoint
            .write()
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(ShardEntry::new(endpoint.clone(), Vec::new(), self.pool_config.clone())))
            .clone()
    }
}

async fn fetch_cluster_nodes(endpoint: &Endpoint) -> Result<Vec<Partition>, ClientError> {
    let conn = Connection::connect(endpoint.clone()).await?;
    let reply = conn.send(RespFrame::command("CLUSTER", vec![Bytes::from_static(b"NODES")])).await?;
    let body = decode_bulk(reply)?;
    Ok(parse_cluster_nodes(&String::from_utf8_lossy(&body)))
}

#[async_trait]
impl Topology for ClusterTopology {
    async fn entry_for_route(
        &self,
        routing_key: Option<&Bytes>,
        _read_only: bool,
    ) -> Result<Arc<ShardEntry>, ClientError> {
        let key = routing_key.ok_or_else(|| {
            ClientError::Protocol("cluster mode requires a routing key for every command".into())
        })?;
        let slot = get_slot(key);
        self.slots
            .read()
            .get(slot as usize)
            .cloned()
            .flatten()
            .ok_or(ClientError::NodeNotFound(slot))
    }

    fn entries(&self) -> Vec<Arc<ShardEntry>> {
        self.entries_by_endpoint.read().values().cloned().collect()
    }

    async fn apply_redirect(&self, redirect: Redirect) -> Result<Arc<ShardEntry>, ClientError> {
        match redirect {
            Redirect::Moved { slot, addr } => {
                let endpoint = parse_endpoint(&addr)?;
                let mapped = self.nat_mapper.map(endpoint);
                let entry = self.entry_for_endpoint(&mapped);
                self.slots.write()[slot as usize] = Some(entry.clone());
                Ok(entry)
            }
            Redirect::Ask { slot: _, addr } => {
                let endpoint = parse_endpoint(&addr)?;
                let mapped = self.nat_mapper.map(endpoint);
                Ok(self.entry_for_endpoint(&mapped))
            }
        }
    }

    fn read_mode(&self) -> ReadMode {
        self.read_mode
    }
}

fn parse_endpoint(addr: &str) -> Result<Endpoint, ClientError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ClientError::Protocol(format!("malformed redirect address: {addr}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ClientError::Protocol(format!("malformed redirect port: {addr}")))?;
    Ok(Endpoint::new(host.to_string(), port))
}

/// Whether a command about to be resent after an ASK redirect needs the
/// `ASKING` hint prefixed first (spec §4.2 "Redirects").
pub fn asking_frame() -> RespFrame {
    RespFrame::command("ASKING", Vec::<Bytes>::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::endpoint::IdentityNatMapper;

    fn topology() -> ClusterTopology {
        ClusterTopology {
            slots: RwLock::new(vec![None; NUM_SLOTS]),
            entries_by_endpoint: RwLock::new(HashMap::new()),
            seeds: RwLock::new(vec![]),
            nat_mapper: Arc::new(IdentityNatMapper),
            pool_config: PoolConfig::default(),
            read_mode: ReadMode::Primary,
            check_slots_coverage: true,
        }
    }

    #[tokio::test]
    async fn entry_for_route_resolves_a_key_to_its_installed_partition() {
        let topo = topology();
        topo.install(vec![Partition {
            primary: Endpoint::new("127.0.0.1", 7000),
            replicas: vec![],
            slots: vec![(0, 16383)],
            primary_failed: false,
        }]);
        let slot = get_slot(b"foo");
        let entry = topo.entry_for_route(Some(&Bytes::from_static(b"foo")), false).await.unwrap();
        assert_eq!(entry.primary(), Endpoint::new("127.0.0.1", 7000));
        assert!((slot as usize) < NUM_SLOTS);
    }

    #[tokio::test]
    async fn unrouted_slot_reports_node_not_found() {
        let topo = topology();
        let err = match topo
            .entry_for_route(Some(&Bytes::from_static(b"foo")), false)
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ClientError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn moved_redirect_updates_the_slot_map() {
        let topo = topology();
        topo.install(vec![Partition {
            primary: Endpoint::new("127.0.0.1", 7000),
            replicas: vec![],
            slots: vec![(0, 16383)],
            primary_failed: false,
        }]);
        let slot = get_slot(b"x");
        let entry = topo
            .apply_redirect(Redirect::Moved { slot, addr: "127.0.0.1:7001".into() })
            .await
            .unwrap();
        assert_eq!(entry.primary(), Endpoint::new("127.0.0.1", 7001));
        let resolved = topo.entry_for_route(Some(&Bytes::from_static(b"x")), false).await.unwrap();
        assert_eq!(resolved.primary(), Endpoint::new("127.0.0.1", 7001));
    }

    #[test]
    fn uncovered_slot_range_fails_the_coverage_check() {
        let partitions = vec![Partition {
            primary: Endpoint::new("127.0.0.1", 7000),
            replicas: vec![],
            slots: vec![(0, 100)],
            primary_failed: false,
        }];
        let covered: u32 = partitions.iter().map(Partition::total_slots).sum();
        assert_ne!(covered, NUM_SLOTS as u32);
    }
}
