//! Metrics registry: counters, per-exchange processing-time averages, and
//! the pipeline queue gauge. All operations are concurrency-safe and
//! wait-free on the hot path (atomics + a sharded per-exchange map guarded
//! by a short-lived `parking_lot` read lock), in the spirit of the
//! teacher's own `performance::metrics` snapshot style.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
struct ExchangeCounters {
    ticks_received: AtomicU64,
    ticks_processed: AtomicU64,
    duplicates_filtered: AtomicU64,
    errors: AtomicU64,
    processed_total_ms: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExchangeSnapshot {
    pub exchange: String,
    pub ticks_received: u64,
    pub ticks_processed: u64,
    pub duplicates_filtered: u64,
    pub errors: u64,
    pub avg_processing_ms: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub per_exchange: Vec<ExchangeSnapshot>,
    pub total_ticks_received: u64,
    pub total_ticks_processed: u64,
    pub total_duplicates_filtered: u64,
    pub total_errors: u64,
    pub total_ticks_stored: u64,
    pub current_queue_size: i64,
    pub uptime_seconds: u64,
    pub snapshot_time: chrono::DateTime<chrono::Utc>,
}

pub struct MetricsRegistry {
    by_exchange: RwLock<HashMap<String, ExchangeCounters>>,
    queue_size: AtomicI64,
    ticks_stored: AtomicU64,
    started_at: Instant,
    started_at_utc: chrono::DateTime<chrono::Utc>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            by_exchange: RwLock::new(HashMap::new()),
            queue_size: AtomicI64::new(0),
            ticks_stored: AtomicU64::new(0),
            started_at: Instant::now(),
            started_at_utc: chrono::Utc::now(),
        }
    }

    fn with_counters<R>(&self, exchange: &str, f: impl FnOnce(&ExchangeCounters) -> R) -> R {
        if let Some(counters) = self.by_exchange.read().get(exchange) {
            return f(counters);
        }
        let mut guard = self.by_exchange.write();
        let counters = guard.entry(exchange.to_string()).or_default();
        f(counters)
    }

    pub fn record_tick_received(&self, exchange: &str) {
        self.with_counters(exchange, |c| {
            c.ticks_received.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_tick_processed(&self, exchange: &str, latency_ms: u64) {
        self.with_counters(exchange, |c| {
            c.ticks_processed.fetch_add(1, Ordering::Relaxed);
            c.processed_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        });
    }

    pub fn record_duplicate_filtered(&self, exchange: &str) {
        self.with_counters(exchange, |c| {
            c.duplicates_filtered.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_pipeline_queue_size(&self, n: i64) {
        self.queue_size.store(n, Ordering::Relaxed);
    }

    pub fn record_error(&self, exchange: &str, _kind: &str) {
        self.with_counters(exchange, |c| {
            c.errors.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_tick_stored(&self, n: u64) {
        self.ticks_stored.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.by_exchange.read();
        let mut per_exchange = Vec::with_capacity(guard.len());
        let (mut total_received, mut total_processed, mut total_dups, mut total_errors) =
            (0u64, 0u64, 0u64, 0u64);

        for (exchange, c) in guard.iter() {
            let received = c.ticks_received.load(Ordering::Relaxed);
            let processed = c.ticks_processed.load(Ordering::Relaxed);
            let dups = c.duplicates_filtered.load(Ordering::Relaxed);
            let errors = c.errors.load(Ordering::Relaxed);
            let total_ms = c.processed_total_ms.load(Ordering::Relaxed);

            let avg_processing_ms = if processed > 0 {
                total_ms as f64 / processed as f64
            } else {
                0.0
            };

            total_received += received;
            total_processed += processed;
            total_dups += dups;
            total_errors += errors;

            per_exchange.push(ExchangeSnapshot {
                exchange: exchange.clone(),
                ticks_received: received,
                ticks_processed: processed,
                duplicates_filtered: dups,
                errors,
                avg_processing_ms,
            });
        }
        per_exchange.sort_by(|a, b| a.exchange.cmp(&b.exchange));

        MetricsSnapshot {
            per_exchange,
            total_ticks_received: total_received,
            total_ticks_processed: total_processed,
            total_duplicates_filtered: total_dups,
            total_errors,
            total_ticks_stored: self.ticks_stored.load(Ordering::Relaxed),
            current_queue_size: self.queue_size.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            snapshot_time: self.started_at_utc + chrono::Duration::seconds(self.started_at.elapsed().as_secs() as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_processing_ms_is_mean_of_samples() {
        let registry = MetricsRegistry::new();
        registry.record_tick_processed("Binance", 10);
        registry.record_tick_processed("Binance", 20);
        registry.record_tick_processed("Binance", 30);

        let snapshot = registry.snapshot();
        let binance = snapshot
            .per_exchange
            .iter()
            .find(|e| e.exchange == "Binance")
            .unwrap();
        assert_eq!(binance.ticks_processed, 3);
        assert_eq!(binance.avg_processing_ms, 20.0);
    }

    #[test]
    fn totals_aggregate_across_exchanges() {
        let registry = MetricsRegistry::new();
        registry.record_tick_received("Binance");
        registry.record_tick_received("Coinbase");
        registry.record_duplicate_filtered("Binance");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_ticks_received, 2);
        assert_eq!(snapshot.total_duplicates_filtered, 1);
    }
}
