//! Reentrant lock (spec §4.6.1): an atomic acquire/release script pair
//! plus a client-side watchdog that keeps a held lease alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_integer;
use crate::core::protocol::resp::RespFrame;
use crate::core::pubsub::PubSubService;
use crate::core::scripts::{eval_cached, lua};

fn lock_channel(name: &str) -> String {
    format!("redisson_lock__channel:{{{name}}}")
}

/// A reentrant, lease-based distributed lock (spec §4.6.1). One instance
/// per (name, holder id) pair; reentrant acquires within the same holder
/// only bump a counter server-side.
pub struct Lock {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    name: String,
    channel: Bytes,
    holder_id: String,
    lease: Duration,
    watchdog_stop: Option<broadcast::Sender<()>>,
    held: AtomicBool,
}

impl Lock {
    pub fn new(executor: Arc<Executor>, pubsub: Arc<PubSubService>, name: impl Into<String>, holder_id: impl Into<String>, lease: Duration) -> Self {
        let name = name.into();
        let channel = Bytes::from(lock_channel(&name));
        Self {
            executor,
            pubsub,
            name,
            channel,
            holder_id: holder_id.into(),
            lease,
            watchdog_stop: None,
            held: AtomicBool::new(false),
        }
    }

    fn key(&self) -> Bytes {
        Bytes::copy_from_slice(keys::root(&self.name).as_bytes())
    }

    /// Runs the acquire script once. `Ok(None)` means the lock was
    /// granted; `Ok(Some(remaining_ttl))` means a different holder owns
    /// it with that many milliseconds left on its lease.
    async fn try_acquire(&self) -> Result<Option<i64>, ClientError> {
        let key = self.key();
        let frame = eval_cached(
            &self.executor,
            lua::LOCK_ACQUIRE,
            vec![key.clone()],
            vec![
                Bytes::copy_from_slice(self.holder_id.as_bytes()),
                Bytes::copy_from_slice(self.lease.as_millis().to_string().as_bytes()),
            ],
            RouteKey::Key(key),
        )
        .await?;
        match frame {
            RespFrame::Null => Ok(None),
            RespFrame::Integer(ttl) => Ok(Some(ttl)),
            other => Err(ClientError::Protocol(format!("unexpected lock acquire reply: {other:?}"))),
        }
    }

    /// Blocks (asynchronously) until the lock is granted or `wait_ms`
    /// elapses, retrying on every wake-up publish (spec §4.6.1 "Client
    /// acquire loop").
    pub async fn acquire(&mut self, wait: Duration) -> Result<bool, ClientError> {
        let deadline = Instant::now() + wait;
        // Subscribed before the first try so a release published between
        // this try_acquire and the next one is never missed.
        let mut subscription = self.pubsub.subscribe(self.channel.clone()).await?;
        loop {
            if self.try_acquire().await?.is_none() {
                self.held.store(true, Ordering::SeqCst);
                self.start_watchdog();
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match tokio::time::timeout(remaining, subscription.recv()).await {
                Ok(Ok(_)) | Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("lock wake-up channel closed: {e}");
                    continue;
                }
            }
        }
    }

    /// Decrements the reentry counter; deletes the key and publishes a
    /// wake-up once it reaches zero (spec §4.6.1 "Release script").
    pub async fn release(&mut self) -> Result<bool, ClientError> {
        let key = self.key();
        let frame = eval_cached(
            &self.executor,
            lua::LOCK_RELEASE,
            vec![key.clone(), self.channel.clone()],
            vec![Bytes::copy_from_slice(self.holder_id.as_bytes()), Bytes::from_static(b"1")],
            RouteKey::Key(key),
        )
        .await?;
        let fully_released = decode_integer(frame)? == 1;
        if fully_released {
            self.held.store(false, Ordering::SeqCst);
            self.stop_watchdog();
        }
        Ok(fully_released)
    }

    /// Spawns a background task that refreshes the lease at `lease / 3`
    /// intervals until stopped. Never extends a lease held by a
    /// different holder, since the refresh script checks holder identity
    /// atomically (spec §4.6.1 "Watchdog cancellation").
    fn start_watchdog(&mut self) {
        if self.watchdog_stop.is_some() {
            return;
        }
        let (tx, rx) = broadcast::channel(1);
        self.watchdog_stop = Some(tx);
        let executor = self.executor.clone();
        let key = self.key();
        let holder_id = self.holder_id.clone();
        let lease = self.lease;
        tokio::spawn(watchdog_loop(executor, key, holder_id, lease, rx));
    }

    fn stop_watchdog(&mut self) {
        if let Some(tx) = self.watchdog_stop.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

async fn watchdog_loop(
    executor: Arc<Executor>,
    key: Bytes,
    holder_id: String,
    lease: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    let interval = (lease / 3).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = eval_cached(
                    &executor,
                    lua::LOCK_WATCHDOG_REFRESH,
                    vec![key.clone()],
                    vec![
                        Bytes::copy_from_slice(holder_id.as_bytes()),
                        Bytes::copy_from_slice(lease.as_millis().to_string().as_bytes()),
                    ],
                    RouteKey::Key(key.clone()),
                )
                .await;
                match result {
                    Ok(RespFrame::Integer(0)) => {
                        debug!(holder_id = %holder_id, "watchdog observed the lease is no longer ours, stopping");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(holder_id = %holder_id, "watchdog refresh failed: {e}"),
                }
            }
            _ = stop.recv() => return,
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_channel_uses_the_literal_boundary_scenario_format() {
        assert_eq!(lock_channel("L"), "redisson_lock__channel:{L}");
    }
}
