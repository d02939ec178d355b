use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use pyaz_types::Result;

use crate::KvStore;

#[derive(Default)]
struct Metrics {
    get_count: AtomicU64,
    set_count: AtomicU64,
    delete_count: AtomicU64,

    // Cumulative latencies in nanoseconds.
    get_latency_ns: AtomicU64,
    set_latency_ns: AtomicU64,
    delete_latency_ns: AtomicU64,
}

/// Wraps any [`KvStore`] with per-operation counters and cumulative latency,
/// using lock-free counters. Semantics and error mapping of the wrapped
/// store are unchanged.
pub struct InstrumentedStore<S> {
    store: S,
    metrics: Metrics,
}

impl<S: KvStore> InstrumentedStore<S> {
    pub fn new(store: S) -> Self {
        InstrumentedStore { store, metrics: Metrics::default() }
    }

    /// A point-in-time view of the counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let get_count = self.metrics.get_count.load(Ordering::Relaxed);
        let set_count = self.metrics.set_count.load(Ordering::Relaxed);
        let delete_count = self.metrics.delete_count.load(Ordering::Relaxed);

        MetricsSnapshot {
            get_count,
            set_count,
            delete_count,
            get_avg_latency: avg(self.metrics.get_latency_ns.load(Ordering::Relaxed), get_count),
            set_avg_latency: avg(self.metrics.set_latency_ns.load(Ordering::Relaxed), set_count),
            delete_avg_latency: avg(
                self.metrics.delete_latency_ns.load(Ordering::Relaxed),
                delete_count,
            ),
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        self.metrics.get_count.store(0, Ordering::Relaxed);
        self.metrics.set_count.store(0, Ordering::Relaxed);
        self.metrics.delete_count.store(0, Ordering::Relaxed);
        self.metrics.get_latency_ns.store(0, Ordering::Relaxed);
        self.metrics.set_latency_ns.store(0, Ordering::Relaxed);
        self.metrics.delete_latency_ns.store(0, Ordering::Relaxed);
    }
}

fn avg(total_ns: u64, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(total_ns / count)
}

impl<S: KvStore> KvStore for InstrumentedStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let start = Instant::now();
        let result = self.store.get(key).await;
        self.metrics.get_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .get_latency_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.store.set(key, value).await;
        self.metrics.set_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .set_latency_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.store.delete(key).await;
        self.metrics.delete_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .delete_latency_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }
}

/// A point-in-time view of the instrumentation counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub get_count: u64,
    pub set_count: u64,
    pub delete_count: u64,
    pub get_avg_latency: Duration,
    pub set_avg_latency: Duration,
    pub delete_avg_latency: Duration,
}
