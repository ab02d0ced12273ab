//! Process-wide metrics registry shared by every crate (ambient stack:
//! structured logging's quantitative sibling). Lives in `trace-core`, the
//! one crate every other crate already depends on, so `trace-collector`,
//! `trace-store`, `trace-snapshot`, and `trace-streaming` can each register
//! their own instruments without a dependency cycle on the streaming
//! server that exposes `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref EVENTS_COLLECTED_TOTAL: IntCounter = register_counter(
        "tracebackbone_events_collected_total",
        "Events accepted by the collector's admission pipeline"
    );
    pub static ref EVENTS_DROPPED_TOTAL: IntCounter = register_counter(
        "tracebackbone_events_dropped_total",
        "Events dropped by sampling, rate limiting, or backpressure"
    );
    pub static ref BATCHES_PERSISTED_TOTAL: IntCounter = register_counter(
        "tracebackbone_batches_persisted_total",
        "Batches successfully written to the persistent store"
    );
    pub static ref SNAPSHOTS_CREATED_TOTAL: IntCounter = register_counter(
        "tracebackbone_snapshots_created_total",
        "Full and incremental snapshots written"
    );
    pub static ref RECONSTRUCTIONS_TOTAL: IntCounter = register_counter(
        "tracebackbone_reconstructions_total",
        "Point-in-time state reconstructions served, cache hits and misses combined"
    );
    pub static ref RECONSTRUCTION_CACHE_HITS_TOTAL: IntCounter = register_counter(
        "tracebackbone_reconstruction_cache_hits_total",
        "Reconstructions served directly from the in-memory state cache"
    );
    pub static ref STREAMING_CLIENTS_CONNECTED: IntGauge = register_gauge(
        "tracebackbone_streaming_clients_connected",
        "Currently connected streaming WebSocket clients"
    );
    pub static ref STREAMING_MESSAGES_DROPPED_TOTAL: IntCounter = register_counter(
        "tracebackbone_streaming_messages_dropped_total",
        "Outbound messages dropped by per-client backpressure"
    );
    pub static ref COLLECT_DURATION_SECONDS: Histogram = register_histogram(
        "tracebackbone_collect_duration_seconds",
        "Time spent in Collector::collect, validation through persistence tee"
    );
    pub static ref RECONSTRUCT_DURATION_SECONDS: Histogram = register_histogram(
        "tracebackbone_reconstruct_duration_seconds",
        "Time spent reconstructing a point-in-time SystemState"
    );
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help)).expect("metric options are valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric name is unique");
    counter
}

fn register_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::with_opts(Opts::new(name, help)).expect("metric options are valid");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric name is unique");
    gauge
}

fn register_histogram(name: &str, help: &str) -> Histogram {
    let histogram =
        Histogram::with_opts(HistogramOpts::new(name, help)).expect("metric options are valid");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric name is unique");
    histogram
}

/// The shared registry, gathered by `trace-streaming`'s `/metrics` handler.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_families_are_gatherable() {
        EVENTS_COLLECTED_TOTAL.inc();
        let families = registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "tracebackbone_events_collected_total"));
    }
}
