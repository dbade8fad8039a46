//! Background eviction and scheduling service (spec §4.7): a single
//! per-client scheduler drives every periodic maintenance job — map-cache
//! eviction, set-with-ttl and time-series eviction, executor queue-transfer
//! sweeps — as `(name, interval, script)` triples. Missed ticks are fine;
//! correctness relies on the scripts being idempotent, the same way the
//! teacher's own `core/tasks/eviction.rs` tolerates a skipped interval
//! under load.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::core::errors::ClientError;

/// One unit of periodic maintenance work. Implementors own whatever state
/// (keys, script, executor handle) they need to run a single sweep.
#[async_trait]
pub trait EvictionJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<(), ClientError>;
}

struct ScheduledJob {
    job: Arc<dyn EvictionJob>,
    interval: Duration,
    next_due: Instant,
}

/// A cheaply-cloneable handle primitives use to register their own
/// eviction/queue-transfer jobs on the one running scheduler, since the
/// scheduler itself is moved into its background task on `connect` and
/// can no longer be reached by `&mut self`.
#[derive(Clone)]
pub struct SchedulerHandle {
    register_tx: mpsc::UnboundedSender<(Arc<dyn EvictionJob>, Duration)>,
}

impl SchedulerHandle {
    /// Registers `job` to run every `interval` on the scheduler this
    /// handle points at. A no-op if the scheduler has already shut down.
    pub fn register(&self, job: Arc<dyn EvictionJob>, interval: Duration) {
        let _ = self.register_tx.send((job, interval));
    }
}

/// Drives every registered [`EvictionJob`] from one task, checking due
/// jobs on a shared tick rather than spawning one task per job — this is
/// the literal "single per-client scheduler" the primitive protocols rely
/// on for lock-watchdog-independent maintenance (locks run their own
/// watchdog task per spec §4.6.1; see `core::scripts::lock`).
pub struct EvictionScheduler {
    jobs: Vec<ScheduledJob>,
    tick_interval: Duration,
    register_rx: mpsc::UnboundedReceiver<(Arc<dyn EvictionJob>, Duration)>,
}

impl EvictionScheduler {
    /// Builds a scheduler plus the [`SchedulerHandle`] primitives use to
    /// register jobs with it after it's been spawned.
    pub fn new(tick_interval: Duration) -> (Self, SchedulerHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        (Self { jobs: Vec::new(), tick_interval, register_rx }, SchedulerHandle { register_tx })
    }

    /// Registers `job` to run every `interval`, starting one interval from
    /// now so a freshly constructed scheduler doesn't fire every job on
    /// its very first tick.
    pub fn register(&mut self, job: Arc<dyn EvictionJob>, interval: Duration) {
        self.jobs.push(ScheduledJob { job, interval, next_due: Instant::now() + interval });
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(jobs = self.jobs.len(), "eviction scheduler started");
        let mut ticker = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    for scheduled in self.jobs.iter_mut() {
                        if now < scheduled.next_due {
                            continue;
                        }
                        scheduled.next_due = now + scheduled.interval;
                        match scheduled.job.run_once().await {
                            Ok(()) => debug!(job = scheduled.job.name(), "eviction sweep completed"),
                            Err(e) => warn!(job = scheduled.job.name(), error = %e, "eviction sweep failed, will retry next interval"),
                        }
                    }
                }
                Some((job, interval)) = self.register_rx.recv() => {
                    info!(job = job.name(), "eviction job registered with running scheduler");
                    self.register(job, interval);
                }
                _ = shutdown_rx.recv() => {
                    info!("eviction scheduler shutting down");
                    return;
                }
            }
        }
    }
}

/// A generic `(ttl-set, idle-set-or-none) -> evict` sweep. Map-caches pass
/// both sorted sets; a plain set-with-ttl or time-series collection passes
/// only the ttl set and a dummy idle set key, since
/// [`crate::core::scripts::lua::MAP_CACHE_EVICT`] treats an always-empty
/// idle set as a no-op contributor (spec §4.7 "each job is a (name,
/// interval, script) triple").
pub struct SortedSetTtlEvictionJob {
    name: String,
    executor: Arc<crate::core::executor::Executor>,
    data_key: bytes::Bytes,
    ttl_key: bytes::Bytes,
    idle_key: bytes::Bytes,
    channel: bytes::Bytes,
}

impl SortedSetTtlEvictionJob {
    pub fn new(
        name: impl Into<String>,
        executor: Arc<crate::core::executor::Executor>,
        data_key: bytes::Bytes,
        ttl_key: bytes::Bytes,
        idle_key: bytes::Bytes,
        channel: bytes::Bytes,
    ) -> Self {
        Self { name: name.into(), executor, data_key, ttl_key, idle_key, channel }
    }

    /// Builds the job for a named map-cache from its own key conventions.
    pub fn for_map_cache(executor: Arc<crate::core::executor::Executor>, map_name: &str) -> Self {
        Self::new(
            format!("map-cache-eviction:{map_name}"),
            executor,
            bytes::Bytes::copy_from_slice(crate::core::keys::root(map_name).as_bytes()),
            bytes::Bytes::copy_from_slice(crate::core::keys::aux(map_name, "ttlset").as_bytes()),
            bytes::Bytes::copy_from_slice(crate::core::keys::aux(map_name, "idleset").as_bytes()),
            bytes::Bytes::copy_from_slice(crate::core::keys::channel(map_name).as_bytes()),
        )
    }
}

#[async_trait]
impl EvictionJob for SortedSetTtlEvictionJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> Result<(), ClientError> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        crate::core::scripts::eval_cached(
            &self.executor,
            crate::core::scripts::lua::MAP_CACHE_EVICT,
            vec![self.data_key.clone(), self.ttl_key.clone(), self.idle_key.clone(), self.channel.clone()],
            vec![bytes::Bytes::copy_from_slice(now_ms.to_string().as_bytes())],
            crate::core::protocol::command::RouteKey::Key(self.data_key.clone()),
        )
        .await?;
        Ok(())
    }
}

/// Wraps a [`crate::core::scripts::scheduler_queue::SchedulerQueue`]'s
/// periodic due-task transfer (spec §4.7 "executor queue-transfer").
pub struct QueueTransferJob {
    name: String,
    queue: Arc<crate::core::scripts::scheduler_queue::SchedulerQueue>,
}

impl QueueTransferJob {
    pub fn new(executor_name: &str, queue: Arc<crate::core::scripts::scheduler_queue::SchedulerQueue>) -> Self {
        Self { name: format!("queue-transfer:{executor_name}"), queue }
    }
}

#[async_trait]
impl EvictionJob for QueueTransferJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> Result<(), ClientError> {
        self.queue.transfer_due().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EvictionJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&self) -> Result<(), ClientError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registered_jobs_run_on_their_own_interval_not_every_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let (mut scheduler, _handle) = EvictionScheduler::new(Duration::from_millis(10));
        scheduler.register(Arc::new(CountingJob { count: count.clone() }), Duration::from_millis(50));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::advance(Duration::from_millis(120)).await;
        tokio::task::yield_now().await;

        let _ = shutdown_tx.send(());
        let _ = handle.await;

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_job_registered_through_the_handle_after_spawn_still_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let (scheduler, scheduler_handle) = EvictionScheduler::new(Duration::from_millis(10));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        scheduler_handle.register(Arc::new(CountingJob { count: count.clone() }), Duration::from_millis(50));
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(120)).await;
        tokio::task::yield_now().await;

        let _ = shutdown_tx.send(());
        let _ = handle.await;

        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
