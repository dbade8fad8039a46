//! Per-(endpoint, role) bounded connection pool (spec §4.1 "Connection &
//! Pool"). Generalizes the teacher's `dashmap`-backed registry pattern
//! (used there for channels and scripts) to a pool of sockets, plus a
//! `parking_lot`-guarded wait queue for fairness on `acquire`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::connection::connection::Connection;
use crate::core::connection::endpoint::Endpoint;
use crate::core::errors::ClientError;
use crate::core::metrics::{POOL_ACTIVE_CONNECTIONS, POOL_IDLE_CONNECTIONS};

/// Which role a pooled connection was borrowed for. Subscribe connections
/// additionally track how many channels they currently host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Write,
    Read,
    Subscribe,
}

/// Tunables carried from the `connection.*` configured options (spec §6).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_active: usize,
    pub min_idle: usize,
    pub connect_timeout: Duration,
    pub idle_connection_timeout: Duration,
    pub subscriptions_per_connection: usize,
    pub connect_retry_attempts: u32,
    /// Custom CA bundle for TLS-enabled endpoints. `None` falls back to
    /// the bundled Mozilla roots.
    pub tls_truststore_path: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 64,
            min_idle: 8,
            connect_timeout: Duration::from_secs(10),
            idle_connection_timeout: Duration::from_secs(10 * 60),
            subscriptions_per_connection: 5,
            connect_retry_attempts: 3,
            tls_truststore_path: None,
        }
    }
}

struct Idle {
    conn: Arc<Connection>,
}

/// Holds up to `min_idle + max_active` connections for one (endpoint,
/// role) pair. `acquire` suspends on a `Notify` until a connection is idle
/// or room exists to open a fresh one.
pub struct Pool {
    endpoint: Endpoint,
    role: PoolRole,
    config: PoolConfig,
    idle: Mutex<VecDeque<Idle>>,
    borrowed_count: Mutex<usize>,
    notify: Notify,
}

impl Pool {
    pub fn new(endpoint: Endpoint, role: PoolRole, config: PoolConfig) -> Self {
        Self {
            endpoint,
            role,
            config,
            idle: Mutex::new(VecDeque::new()),
            borrowed_count: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    fn total(&self) -> usize {
        self.idle.lock().len() + *self.borrowed_count.lock()
    }

    fn role_label(&self) -> &'static str {
        match self.role {
            PoolRole::Write => "write",
            PoolRole::Read => "read",
            PoolRole::Subscribe => "subscribe",
        }
    }

    fn report_metrics(&self) {
        let addr = self.endpoint.addr_string();
        let labels = [addr.as_str(), self.role_label()];
        POOL_ACTIVE_CONNECTIONS.with_label_values(&labels).set(*self.borrowed_count.lock() as f64);
        POOL_IDLE_CONNECTIONS.with_label_values(&labels).set(self.idle.lock().len() as f64);
    }

    /// Opens one fresh connection, retrying up to `connect_retry_attempts`
    /// times with a fresh socket each attempt (spec §4.1: "Failed connect
    /// is retried with bounded attempts; each attempt creates a fresh
    /// socket").
    async fn open_one(&self) -> Result<Arc<Connection>, ClientError> {
        let mut last_err = None;
        for attempt in 0..self.config.connect_retry_attempts.max(1) {
            match tokio::time::timeout(
                self.config.connect_timeout,
                Connection::connect_with_truststore(self.endpoint.clone(), self.config.tls_truststore_path.as_deref()),
            )
            .await
            {
                Ok(Ok(conn)) => return Ok(Arc::new(conn)),
                Ok(Err(e)) => {
                    warn!(attempt, endpoint = %self.endpoint, "connect attempt failed: {e}");
                    last_err = Some(e);
                }
                Err(_) => {
                    last_err = Some(ClientError::ResponseTimeout);
                }
            }
        }
        Err(last_err.unwrap_or(ClientError::CantConnect))
    }

    /// Suspends until a connection is available or `deadline` elapses.
    pub async fn acquire(&self, deadline: Duration) -> Result<Arc<Connection>, ClientError> {
        tokio::time::timeout(deadline, self.acquire_inner())
            .await
            .map_err(|_| ClientError::PoolExhausted)?
    }

    async fn acquire_inner(&self) -> Result<Arc<Connection>, ClientError> {
        loop {
            if let Some(idle) = self.idle.lock().pop_front() {
                if idle.conn.is_closed() {
                    continue;
                }
                *self.borrowed_count.lock() += 1;
                self.report_metrics();
                return Ok(idle.conn);
            }

            if self.total() < self.config.max_active + self.config.min_idle {
                let conn = self.open_one().await?;
                *self.borrowed_count.lock() += 1;
                self.report_metrics();
                return Ok(conn);
            }

            self.notify.notified().await;
        }
    }

    /// Returns a connection to the idle set, or discards it on fatal
    /// error so a fresh one is opened on next acquire.
    pub fn release(&self, conn: Arc<Connection>) {
        *self.borrowed_count.lock() = self.borrowed_count.lock().saturating_sub(1);
        if conn.is_closed() {
            debug!(id = conn.id(), "discarding closed connection on release");
        } else {
            self.idle.lock().push_back(Idle { conn });
        }
        self.report_metrics();
        self.notify.notify_one();
    }

    /// Background min-idle refill: opens fresh connections until the idle
    /// set plus borrowed count reaches `min_idle`.
    pub async fn refill_min_idle(&self) {
        while self.total() < self.config.min_idle {
            match self.open_one().await {
                Ok(conn) => self.idle.lock().push_back(Idle { conn }),
                Err(e) => {
                    warn!(endpoint = %self.endpoint, "min-idle refill failed: {e}");
                    break;
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// Closes idle connections older than `idle_connection_timeout`.
    /// Borrowed connections are never touched: their in-flight FIFO may
    /// be non-empty.
    pub fn reap_idle(&self) {
        let mut idle = self.idle.lock();
        idle.retain(|entry| {
            let keep = entry.conn.idle_for() < self.config.idle_connection_timeout;
            if !keep {
                entry.conn.mark_draining();
            }
            keep
        });
    }

    /// Finds a subscribe-role connection with spare subscription capacity,
    /// or `None` if every pooled connection (idle or borrowed) is full —
    /// the caller should then open a fresh one via `acquire`.
    pub fn find_subscribe_capacity(&self, current_subscriptions: impl Fn(&Connection) -> usize) -> Option<Arc<Connection>> {
        self.idle
            .lock()
            .iter()
            .map(|entry| entry.conn.clone())
            .find(|conn| current_subscriptions(conn) < self.config.subscriptions_per_connection)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn borrowed_count(&self) -> usize {
        *self.borrowed_count.lock()
    }

    /// Drains every idle connection, marking it draining, for shutdown.
    pub fn drain(&self) {
        let mut idle = self.idle.lock();
        for entry in idle.iter() {
            entry.conn.mark_draining();
        }
        idle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PoolConfig {
        PoolConfig {
            max_active: 2,
            min_idle: 0,
            connect_timeout: Duration::from_millis(200),
            idle_connection_timeout: Duration::from_secs(60),
            subscriptions_per_connection: 3,
            connect_retry_attempts: 1,
            tls_truststore_path: None,
        }
    }

    #[tokio::test]
    async fn acquire_times_out_when_nothing_is_listening() {
        // Port 9 is the standard discard service slot; nothing should be
        // listening on localhost for it in CI, so connect fails fast and
        // the pool surfaces pool-exhaustion once attempts run out.
        let pool = Pool::new(Endpoint::new("127.0.0.1", 1), PoolRole::Write, config());
        let result = pool.acquire(Duration::from_millis(300)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn release_of_a_closed_connection_does_not_repopulate_idle() {
        let pool = Pool::new(Endpoint::new("127.0.0.1", 6379), PoolRole::Write, config());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.borrowed_count(), 0);
    }
}
