//! The tick-processing pipeline: a bounded, multi-producer/single-consumer
//! queue running normalize -> dedup -> symbol-filter -> sequential handler
//! fan-out, with backpressure and per-stage metrics.

use crate::dedup::Deduplicator;
use crate::domain::{NormalizedTick, RawTick};
use crate::error::{AppError, AppResult};
use crate::metrics::MetricsRegistry;
use crate::shutdown::ShutdownSignal;
use crate::symbol_filter::SymbolFilter;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Bounded queue capacity. Producers block once it fills (backpressure,
/// never drop).
pub const QUEUE_CAPACITY: usize = 10_000;

/// The shutdown drain is best-effort and bounded.
pub const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait TickHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, tick: &NormalizedTick) -> AppResult<()>;
}

/// Write-endpoint handed to producer adapters. Cloning is cheap; every
/// clone shares the same bounded channel and shutdown gate.
#[derive(Clone)]
pub struct PipelineWriter {
    tx: mpsc::Sender<RawTick>,
    accepting: Arc<AtomicBool>,
    metrics: Arc<MetricsRegistry>,
}

impl PipelineWriter {
    /// Blocks (this is the backpressure signal) when the queue is full, and
    /// is cancellation-safe: dropping the awaited future before it resolves
    /// leaves the channel state untouched.
    pub async fn write(&self, tick: RawTick) -> AppResult<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(AppError::BackendUnavailable(
                "pipeline is shutting down; no new ticks are accepted".into(),
            ));
        }
        self.metrics.record_tick_received(&tick.exchange);
        self.tx
            .send(tick)
            .await
            .map_err(|_| AppError::BackendUnavailable("pipeline consumer has stopped".into()))
    }
}

pub struct Pipeline {
    tx: mpsc::Sender<RawTick>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<RawTick>>>,
    accepting: Arc<AtomicBool>,
    handlers: RwLock<Vec<Arc<dyn TickHandler>>>,
    started: AtomicBool,
    dedup: Arc<dyn Deduplicator>,
    symbol_filter: Arc<SymbolFilter>,
    metrics: Arc<MetricsRegistry>,
}

impl Pipeline {
    pub fn new(
        dedup: Arc<dyn Deduplicator>,
        symbol_filter: Arc<SymbolFilter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Arc::new(Self {
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            accepting: Arc::new(AtomicBool::new(true)),
            handlers: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            dedup,
            symbol_filter,
            metrics,
        })
    }

    pub fn writer(&self) -> PipelineWriter {
        PipelineWriter {
            tx: self.tx.clone(),
            accepting: self.accepting.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Handlers must be registered before `start`; registering afterwards
    /// is an error.
    pub fn register_handler(&self, handler: Arc<dyn TickHandler>) -> AppResult<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(AppError::Configuration(
                "cannot register a handler after the pipeline has started".into(),
            ));
        }
        self.handlers.write().push(handler);
        Ok(())
    }

    /// Idempotent-rejecting: a second call returns an error rather than
    /// starting a second consumer.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) -> AppResult<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(AppError::Configuration("pipeline already started".into()));
        }
        let rx = self
            .rx
            .lock()
            .take()
            .expect("receiver is only taken once, guarded by `started`");

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run(rx, shutdown).await }))
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RawTick>, mut shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                maybe_tick = rx.recv() => {
                    match maybe_tick {
                        Some(raw) => self.process(raw).await,
                        None => break,
                    }
                }
            }
        }

        // Writer is closed first: no new producers are admitted from here.
        self.accepting.store(false, Ordering::Release);

        let drain = async {
            while let Ok(raw) = rx.try_recv() {
                self.process(raw).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_DEADLINE, drain).await.is_err() {
            warn!("pipeline shutdown drain exceeded its deadline; remaining queued ticks were abandoned");
        }
    }

    async fn process(&self, raw: RawTick) {
        let depth = (QUEUE_CAPACITY.saturating_sub(self.tx.capacity())) as i64;
        self.metrics.record_pipeline_queue_size(depth);

        let exchange = raw.exchange.clone();
        let received_at = raw.received_at;
        let normalized: NormalizedTick = raw.into();

        match self.dedup.is_unique(&normalized).await {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.record_duplicate_filtered(&exchange);
                return;
            }
            Err(e) => {
                // TransientBackend: the dedup check is skipped for this
                // tick rather than the tick being dropped or the consumer
                // stalling.
                warn!(exchange = %exchange, error = %e, "dedup backend unavailable, admitting tick without dedup check");
                self.metrics.record_error(&exchange, "dedup_unavailable");
            }
        }

        if !self.symbol_filter.is_allowed(&normalized) {
            return;
        }

        let handlers: Vec<Arc<dyn TickHandler>> = self.handlers.read().clone();
        for handler in &handlers {
            if let Err(e) = handler.handle(&normalized).await {
                error!(handler = handler.name(), error = %e, "tick handler failed; continuing with remaining handlers");
            }
        }

        let latency_ms = (chrono::Utc::now() - received_at).num_milliseconds().max(0) as u64;
        debug!(exchange = %exchange, latency_ms, "tick processed");
        self.metrics.record_tick_processed(&exchange, latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDeduplicator;
    use crate::domain::SourceType;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
        name: &'static str,
    }

    #[async_trait]
    impl TickHandler for CountingHandler {
        fn name(&self) -> &str {
            self.name
        }
        async fn handle(&self, _tick: &NormalizedTick) -> AppResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TickHandler for FailingHandler {
        fn name(&self) -> &str {
            "failing"
        }
        async fn handle(&self, _tick: &NormalizedTick) -> AppResult<()> {
            Err(AppError::Validation("boom".into()))
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        Pipeline::new(
            Arc::new(InMemoryDeduplicator::new()),
            Arc::new(SymbolFilter::new([("Binance", vec!["BTCUSDT"])])),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn dispatches_to_handlers_and_filters_unknown_symbols() {
        let pipeline = pipeline();
        let count = Arc::new(AtomicUsize::new(0));
        pipeline
            .register_handler(Arc::new(CountingHandler { count: count.clone(), name: "h1" }))
            .unwrap();

        let (_handle, shutdown) = crate::shutdown::shutdown_channel();
        let writer = pipeline.writer();
        let join = pipeline.start(shutdown).unwrap();

        writer
            .write(RawTick::new("Binance", SourceType::Streaming, "btcusdt", dec!(1), dec!(1), chrono::Utc::now()))
            .await
            .unwrap();
        writer
            .write(RawTick::new("Binance", SourceType::Streaming, "dogeusdt", dec!(1), dec!(1), chrono::Utc::now()))
            .await
            .unwrap();

        // Give the consumer a moment to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        _handle.cancel();
        join.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1, "only the allow-listed symbol should reach handlers");
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_block_the_others() {
        let pipeline = pipeline();
        let count = Arc::new(AtomicUsize::new(0));
        pipeline.register_handler(Arc::new(FailingHandler)).unwrap();
        pipeline
            .register_handler(Arc::new(CountingHandler { count: count.clone(), name: "h2" }))
            .unwrap();

        let (handle, shutdown) = crate::shutdown::shutdown_channel();
        let writer = pipeline.writer();
        let join = pipeline.start(shutdown).unwrap();

        writer
            .write(RawTick::new("Binance", SourceType::Streaming, "btcusdt", dec!(1), dec!(1), chrono::Utc::now()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        join.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registering_a_handler_after_start_is_an_error() {
        let pipeline = pipeline();
        let (handle, shutdown) = crate::shutdown::shutdown_channel();
        pipeline.start(shutdown).unwrap();

        let err = pipeline
            .register_handler(Arc::new(FailingHandler))
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        handle.cancel();
    }

    #[tokio::test]
    async fn starting_twice_is_an_error() {
        let pipeline = pipeline();
        let (handle, shutdown) = crate::shutdown::shutdown_channel();
        pipeline.start(shutdown.clone()).unwrap();
        let err = pipeline.start(shutdown).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        handle.cancel();
    }
}
