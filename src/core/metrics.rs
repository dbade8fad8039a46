//! Client-observable Prometheus metrics (spec §9 ambient health surface):
//! pool utilization, retry counts, and redirect counts, scoped down from
//! the teacher's `core/metrics.rs` registry-based approach to what a
//! client can see about itself — no server-side memory or keyspace
//! metrics, which stay out of scope.

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static POOL_ACTIVE_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        prometheus::Opts::new("orbiter_pool_active_connections", "Connections currently borrowed from a pool.")
            .const_label("component", "connection_pool"),
        &["endpoint", "role"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static POOL_IDLE_CONNECTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        prometheus::Opts::new("orbiter_pool_idle_connections", "Connections currently idle in a pool."),
        &["endpoint", "role"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

pub static COMMAND_RETRIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let counter = Counter::new("orbiter_command_retries_total", "Total number of command retry attempts.").unwrap();
    REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static CLUSTER_REDIRECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        prometheus::Opts::new("orbiter_cluster_redirects_total", "Total number of MOVED/ASK redirects followed."),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static TOPOLOGY_MODE: Lazy<Gauge> = Lazy::new(|| {
    let gauge = Gauge::new("orbiter_topology_endpoints", "Number of endpoints the topology manager currently tracks.").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
});

/// Gathers every registered metric and encodes it in the Prometheus text
/// exposition format, for a caller to serve on its own `/metrics` route.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_every_registered_metric_name() {
        COMMAND_RETRIES_TOTAL.inc();
        let text = gather();
        assert!(text.contains("orbiter_command_retries_total"));
    }
}
