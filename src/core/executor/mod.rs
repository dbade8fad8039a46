//! The command executor (C4, spec §4.3): resolves a shard-entry, borrows
//! a connection, applies the per-attempt timeout, and retries on
//! connection error or cluster redirect up to a bounded attempt count.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::errors::ClientError;
use crate::core::metrics::{CLUSTER_REDIRECTS_TOTAL, COMMAND_RETRIES_TOTAL};
use crate::core::protocol::command::{Command, RouteKey};
use crate::core::protocol::decode::{Redirect, ReplyOutcome, classify};
use crate::core::protocol::resp::RespFrame;
use crate::core::topology::{ShardEntry, Topology};

/// Tunables carried from the `connection.*`/`batch.*` configured options
/// that govern retry behavior (spec §6).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub response_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            retry_attempts: 3,
            retry_interval: Duration::from_millis(1500),
        }
    }
}

pub struct Executor {
    topology: Arc<dyn Topology>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(topology: Arc<dyn Topology>, config: ExecutorConfig) -> Self {
        Self { topology, config }
    }

    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs a fully-typed [`Command`] through the submission algorithm and
    /// decodes its reply.
    pub async fn execute<T>(&self, cmd: Command<T>) -> Result<T, ClientError> {
        let retry_budget = if cmd.retry_budget > 0 { cmd.retry_budget } else { self.config.retry_attempts };
        let frame = self
            .execute_frame(cmd.name, cmd.args, cmd.route, cmd.read_only, cmd.deadline, retry_budget)
            .await?;
        (cmd.decoder)(frame)
    }

    /// A convenience path for callers that just want the raw reply frame
    /// (the `Expirable` trait and the server-side script protocol use
    /// this directly instead of building a full `Command`).
    pub async fn send_raw(
        &self,
        name: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        read_only: bool,
    ) -> Result<RespFrame, ClientError> {
        self.execute_frame(name, args, route, read_only, None, self.config.retry_attempts).await
    }

    pub async fn send_eval(
        &self,
        script: &'static str,
        keys: Vec<Bytes>,
        argv: Vec<Bytes>,
        route: RouteKey,
    ) -> Result<RespFrame, ClientError> {
        let mut args = Vec::with_capacity(2 + keys.len() + argv.len());
        args.push(Bytes::from_static(script.as_bytes()));
        args.push(Bytes::copy_from_slice(keys.len().to_string().as_bytes()));
        args.extend(keys);
        args.extend(argv);
        self.execute_frame("EVAL", args, route, false, None, self.config.retry_attempts).await
    }

    async fn execute_frame(
        &self,
        name: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        read_only: bool,
        deadline: Option<Instant>,
        retry_attempts: u32,
    ) -> Result<RespFrame, ClientError> {
        let body = self.execute_frame_inner(name, args, route, read_only, retry_attempts);
        match deadline {
            Some(instant) => {
                let remaining = instant.saturating_duration_since(Instant::now());
                tokio::time::timeout(remaining, body)
                    .await
                    .map_err(|_| ClientError::WaitTimeout)?
            }
            None => body.await,
        }
    }

    async fn execute_frame_inner(
        &self,
        name: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        read_only: bool,
        retry_attempts: u32,
    ) -> Result<RespFrame, ClientError> {
        let routing_key = match &route {
            RouteKey::Key(k) => Some(k.clone()),
            RouteKey::Fixed(_) => None,
        };

        let mut override_entry: Option<Arc<ShardEntry>> = None;
        let mut asking = false;
        let mut attempts = 0u32;

        loop {
            let entry = match override_entry.take() {
                Some(e) => e,
                None => self.topology.entry_for_route(routing_key.as_ref(), read_only).await?,
            };
            let pool = if read_only { entry.read_pool(self.topology.read_mode()) } else { entry.write_pool() };

            let conn = match pool.acquire(self.config.response_timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    if attempts >= retry_attempts {
                        return Err(e);
                    }
                    attempts += 1;
                    COMMAND_RETRIES_TOTAL.inc();
                    tokio::time::sleep(self.config.retry_interval).await;
                    continue;
                }
            };

            if asking
                && let Err(e) = conn.send(RespFrame::command("ASKING", Vec::<Bytes>::new())).await
            {
                pool.release(conn);
                warn!("ASKING hint failed: {e}");
                if attempts >= retry_attempts {
                    return Err(e);
                }
                attempts += 1;
                COMMAND_RETRIES_TOTAL.inc();
                continue;
            }

            let send_result = tokio::time::timeout(
                self.config.response_timeout,
                conn.send(RespFrame::command(name, args.iter().cloned())),
            )
            .await;
            pool.release(conn);

            let frame = match send_result {
                Err(_) => return Err(ClientError::ResponseTimeout),
                Ok(Err(e)) if e.is_connection_fatal() => {
                    if attempts >= retry_attempts {
                        return Err(e);
                    }
                    attempts += 1;
                    COMMAND_RETRIES_TOTAL.inc();
                    asking = false;
                    debug!("connection-fatal error, retrying: {e}");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(frame)) => frame,
            };

            match classify(frame) {
                ReplyOutcome::Value(frame) => return Ok(frame),
                ReplyOutcome::ServerError(msg) => return Err(ClientError::Server(msg)),
                ReplyOutcome::Redirect(redirect) => {
                    if attempts >= retry_attempts {
                        return Err(ClientError::TooManyRedirects(retry_attempts));
                    }
                    attempts += 1;
                    asking = matches!(redirect, Redirect::Ask { .. });
                    CLUSTER_REDIRECTS_TOTAL.with_label_values(&[if asking { "ask" } else { "moved" }]).inc();
                    let target = self.topology.apply_redirect(redirect).await?;
                    override_entry = Some(target);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::decode::Redirect as ProtoRedirect;
    use crate::core::topology::ReadMode;
    use async_trait::async_trait;

    struct NeverResolves;

    #[async_trait]
    impl Topology for NeverResolves {
        async fn entry_for_route(
            &self,
            _routing_key: Option<&Bytes>,
            _read_only: bool,
        ) -> Result<Arc<ShardEntry>, ClientError> {
            Err(ClientError::NodeNotFound(0))
        }

        fn entries(&self) -> Vec<Arc<ShardEntry>> {
            Vec::new()
        }

        async fn apply_redirect(&self, _redirect: ProtoRedirect) -> Result<Arc<ShardEntry>, ClientError> {
            Err(ClientError::Protocol("no redirects".into()))
        }

        fn read_mode(&self) -> ReadMode {
            ReadMode::Primary
        }
    }

    #[tokio::test]
    async fn unresolvable_routing_key_surfaces_node_not_found() {
        let executor = Executor::new(Arc::new(NeverResolves), ExecutorConfig::default());
        let err = executor
            .send_raw(
                "GET",
                vec![Bytes::from_static(b"k")],
                RouteKey::Key(Bytes::from_static(b"k")),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NodeNotFound(_)));
    }
}
