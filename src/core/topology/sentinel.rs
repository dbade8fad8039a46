//! Sentinel-tracked topology (spec §4.2 "Sentinel mode"): a background
//! loop polls one sentinel for the named primary and its replicas and,
//! on change, performs the same swap-and-drain procedure as cluster mode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::connection::{Connection, Endpoint, PoolConfig};
use crate::core::errors::ClientError;
use crate::core::protocol::decode::{Redirect, decode_bulk_array};
use crate::core::protocol::resp::RespFrame;
use crate::core::topology::{ReadMode, ShardEntry, Topology};

pub struct SentinelTopology {
    entry: Arc<ShardEntry>,
    read_mode: ReadMode,
}

impl SentinelTopology {
    /// Connects to the first reachable sentinel, resolves `master_name`,
    /// and starts the polling loop.
    pub async fn connect(
        sentinel_endpoints: Vec<Endpoint>,
        master_name: String,
        read_mode: ReadMode,
        poll_interval: Duration,
        pool_config: PoolConfig,
    ) -> Result<Arc<Self>, ClientError> {
        let (primary, replicas) = poll_once(&sentinel_endpoints, &master_name).await?;
        let entry = Arc::new(ShardEntry::new(primary, replicas, pool_config));
        let topology = Arc::new(Self { entry, read_mode });

        let loop_entry = topology.entry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                match poll_once(&sentinel_endpoints, &master_name).await {
                    Ok((new_primary, new_replicas)) => {
                        if new_primary != loop_entry.primary() {
                            debug!(%new_primary, "sentinel reported a new primary");
                            loop_entry.promote_primary(new_primary);
                        }
                        if new_replicas != loop_entry.replicas() {
                            loop_entry.set_replicas(new_replicas);
                        }
                    }
                    Err(e) => warn!("sentinel poll failed: {e}"),
                }
            }
        });

        Ok(topology)
    }
}

async fn poll_once(
    sentinel_endpoints: &[Endpoint],
    master_name: &str,
) -> Result<(Endpoint, Vec<Endpoint>), ClientError> {
    let mut last_err = ClientError::CantConnect;
    for endpoint in sentinel_endpoints {
        match query_sentinel(endpoint, master_name).await {
            Ok(result) => return Ok(result),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

async fn query_sentinel(
    endpoint: &Endpoint,
    master_name: &str,
) -> Result<(Endpoint, Vec<Endpoint>), ClientError> {
    let conn = Connection::connect(endpoint.clone()).await?;

    let master_reply = conn
        .send(RespFrame::command(
            "SENTINEL",
            vec![
                Bytes::from_static(b"get-master-addr-by-name"),
                Bytes::copy_from_slice(master_name.as_bytes()),
            ],
        ))
        .await?;
    let master_parts = decode_bulk_array(master_reply)?;
    if master_parts.len() != 2 {
        return Err(ClientError::Protocol("malformed sentinel master reply".into()));
    }
    let host = String::from_utf8_lossy(&master_parts[0]).into_owned();
    let port: u16 = String::from_utf8_lossy(&master_parts[1])
        .parse()
        .map_err(|_| ClientError::Protocol("malformed sentinel master port".into()))?;
    let primary = Endpoint::new(host, port);

    let replicas_reply = conn
        .send(RespFrame::command(
            "SENTINEL",
            vec![
                Bytes::from_static(b"replicas"),
                Bytes::copy_from_slice(master_name.as_bytes()),
            ],
        ))
        .await?;
    let replicas = parse_replica_rows(replicas_reply);

    Ok((primary, replicas))
}

/// Each replica row from `SENTINEL replicas` is a flat array of field
/// name/value pairs; we only need `ip`/`port`.
fn parse_replica_rows(frame: RespFrame) -> Vec<Endpoint> {
    let RespFrame::Array(rows) = frame else {
        return Vec::new();
    };
    rows.into_iter()
        .filter_map(|row| {
            let RespFrame::Array(fields) = row else {
                return None;
            };
            let mut ip = None;
            let mut port = None;
            let mut iter = fields.into_iter();
            while let (Some(RespFrame::BulkString(k)), Some(RespFrame::BulkString(v))) =
                (iter.next(), iter.next())
            {
                match k.as_ref() {
                    b"ip" => ip = Some(String::from_utf8_lossy(&v).into_owned()),
                    b"port" => port = String::from_utf8_lossy(&v).parse::<u16>().ok(),
                    _ => {}
                }
            }
            Some(Endpoint::new(ip?, port?))
        })
        .collect()
}

#[async_trait]
impl Topology for SentinelTopology {
    async fn entry_for_route(
        &self,
        _routing_key: Option<&Bytes>,
        _read_only: bool,
    ) -> Result<Arc<ShardEntry>, ClientError> {
        Ok(self.entry.clone())
    }

    fn entries(&self) -> Vec<Arc<ShardEntry>> {
        vec![self.entry.clone()]
    }

    async fn apply_redirect(&self, _redirect: Redirect) -> Result<Arc<ShardEntry>, ClientError> {
        Err(ClientError::Protocol(
            "received a cluster redirect while running in sentinel mode".into(),
        ))
    }

    fn read_mode(&self) -> ReadMode {
        self.read_mode
    }
}
