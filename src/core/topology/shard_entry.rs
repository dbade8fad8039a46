//! `MasterSlaveEntry` (spec §3 "Shard entry"): one primary endpoint plus
//! its replicas and all three role pools, the client-side owner every
//! topology mode ultimately hands back from `entry_for_route`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::core::connection::{Endpoint, Pool, PoolConfig, PoolRole};

/// How read-only commands choose between the primary and its replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Primary,
    Replica,
    Any,
}

pub struct ShardEntry {
    primary: RwLock<Endpoint>,
    replicas: RwLock<Vec<Endpoint>>,
    write_pool: RwLock<Arc<Pool>>,
    read_pools: RwLock<Vec<Arc<Pool>>>,
    subscribe_pool: RwLock<Arc<Pool>>,
    ref_count: AtomicUsize,
    pool_config: PoolConfig,
    next_read_pool: AtomicUsize,
}

impl ShardEntry {
    pub fn new(primary: Endpoint, replicas: Vec<Endpoint>, pool_config: PoolConfig) -> Self {
        let write_pool = Arc::new(Pool::new(primary.clone(), PoolRole::Write, pool_config.clone()));
        let read_pools = if replicas.is_empty() {
            vec![write_pool.clone()]
        } else {
            replicas
                .iter()
                .map(|r| Arc::new(Pool::new(r.clone(), PoolRole::Read, pool_config.clone())))
                .collect()
        };
        let subscribe_pool = Arc::new(Pool::new(primary.clone(), PoolRole::Subscribe, pool_config.clone()));

        Self {
            primary: RwLock::new(primary),
            replicas: RwLock::new(replicas),
            write_pool: RwLock::new(write_pool),
            read_pools: RwLock::new(read_pools),
            subscribe_pool: RwLock::new(subscribe_pool),
            ref_count: AtomicUsize::new(1),
            pool_config,
            next_read_pool: AtomicUsize::new(0),
        }
    }

    pub fn primary(&self) -> Endpoint {
        self.primary.read().clone()
    }

    pub fn replicas(&self) -> Vec<Endpoint> {
        self.replicas.read().clone()
    }

    pub fn write_pool(&self) -> Arc<Pool> {
        self.write_pool.read().clone()
    }

    /// Picks a read pool with simple round robin across replicas (or the
    /// write pool, if there are none — `ReadMode::Replica` degrades to
    /// the primary rather than failing outright).
    pub fn read_pool(&self, mode: ReadMode) -> Arc<Pool> {
        if mode == ReadMode::Primary {
            return self.write_pool();
        }
        let pools = self.read_pools.read();
        if pools.is_empty() {
            return self.write_pool();
        }
        let idx = self.next_read_pool.fetch_add(1, Ordering::Relaxed) % pools.len();
        pools[idx].clone()
    }

    pub fn subscribe_pool(&self) -> Arc<Pool> {
        self.subscribe_pool.read().clone()
    }

    pub fn incr_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_ref(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Atomically swaps the primary endpoint, installing a fresh write
    /// pool and draining the old one (spec §4.2 "master promotions...
    /// atomically swapping the shard-entry's primary and draining the old
    /// one").
    pub fn promote_primary(&self, new_primary: Endpoint) {
        let old_pool = {
            let mut primary = self.primary.write();
            *primary = new_primary.clone();
            let mut write_pool = self.write_pool.write();
            std::mem::replace(
                &mut *write_pool,
                Arc::new(Pool::new(new_primary, PoolRole::Write, self.pool_config.clone())),
            )
        };
        old_pool.drain();
    }

    pub fn set_replicas(&self, new_replicas: Vec<Endpoint>) {
        let new_pools = if new_replicas.is_empty() {
            vec![self.write_pool()]
        } else {
            new_replicas
                .iter()
                .map(|r| Arc::new(Pool::new(r.clone(), PoolRole::Read, self.pool_config.clone())))
                .collect()
        };
        let old_pools = {
            *self.replicas.write() = new_replicas;
            std::mem::replace(&mut *self.read_pools.write(), new_pools)
        };
        for pool in old_pools {
            pool.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_has_a_single_reference() {
        let entry = ShardEntry::new(Endpoint::new("127.0.0.1", 6379), vec![], PoolConfig::default());
        assert_eq!(entry.ref_count(), 1);
    }

    #[test]
    fn read_pool_falls_back_to_write_pool_with_no_replicas() {
        let entry = ShardEntry::new(Endpoint::new("127.0.0.1", 6379), vec![], PoolConfig::default());
        assert_eq!(entry.read_pool(ReadMode::Any).endpoint(), &Endpoint::new("127.0.0.1", 6379));
    }

    #[test]
    fn decr_ref_reports_the_post_decrement_count() {
        let entry = ShardEntry::new(Endpoint::new("127.0.0.1", 6379), vec![], PoolConfig::default());
        entry.incr_ref();
        assert_eq!(entry.decr_ref(), 1);
    }
}
