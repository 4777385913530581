//! Generic REST-poll adapter: periodically calls a [`PollSource`] and pushes
//! whatever raw ticks it returns onto the pipeline. Grounded on the
//! `reqwest`-based rate-limited poll pattern in `scrapers::polymarket_api`.

use super::{
    sleep_or_cancel, AdapterState, AdapterStatus, AdapterStatusCell, BackoffCalculator, ErrorStreak, ExchangeAdapter,
};
use crate::domain::{RawTick, SourceType};
use crate::error::AppResult;
use crate::pipeline::PipelineWriter;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One exchange's REST polling logic: fetch the latest trades since the
/// previous call. Implementations own their own `reqwest::Client` and
/// pagination/rate-limit state.
#[async_trait]
pub trait PollSource: Send + Sync {
    fn exchange(&self) -> &str;
    async fn poll(&self) -> AppResult<Vec<RawTick>>;
}

pub struct PolledRestAdapter {
    source: Arc<dyn PollSource>,
    poll_interval: Duration,
    status: Arc<AdapterStatusCell>,
}

impl PolledRestAdapter {
    pub fn new(source: Arc<dyn PollSource>, poll_interval: Duration) -> Self {
        let status = Arc::new(AdapterStatusCell::new(source.exchange(), SourceType::Polled));
        Self { source, poll_interval, status }
    }
}

#[async_trait]
impl ExchangeAdapter for PolledRestAdapter {
    fn exchange(&self) -> &str {
        self.source.exchange()
    }

    fn source_type(&self) -> SourceType {
        SourceType::Polled
    }

    async fn start(&self, writer: PipelineWriter, mut shutdown: ShutdownSignal) -> AppResult<()> {
        self.status.set_state(AdapterState::Running);
        let errors = ErrorStreak::default();
        let mut backoff = BackoffCalculator::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let wait = match self.source.poll().await {
                Ok(ticks) => {
                    errors.reset();
                    backoff.reset();
                    self.status.set_online(true);
                    for tick in ticks {
                        self.status.record_tick();
                        if writer.write(tick).await.is_err() {
                            break;
                        }
                    }
                    self.poll_interval
                }
                Err(e) => {
                    let streak = errors.hit();
                    self.status.record_error(e.to_string());
                    let wait = backoff.next_backoff();
                    warn!(
                        exchange = self.source.exchange(),
                        error = %e,
                        consecutive_errors = streak,
                        backoff_ms = wait.as_millis() as u64,
                        "poll failed, backing off"
                    );
                    wait
                }
            };

            if sleep_or_cancel(wait, &mut shutdown).await {
                break;
            }
        }

        self.status.set_state(AdapterState::Idle);
        self.status.set_online(false);
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PollSource for FlakySource {
        fn exchange(&self) -> &str {
            "Dome"
        }

        async fn poll(&self) -> AppResult<Vec<RawTick>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(AppError::BackendUnavailable("rate limited".into()));
            }
            Ok(vec![RawTick::new(
                "Dome",
                SourceType::Polled,
                "BTCUSDT",
                dec!(50000),
                dec!(1),
                chrono::Utc::now(),
            )])
        }
    }

    #[tokio::test]
    async fn survives_a_failed_poll_and_recovers() {
        let source = Arc::new(FlakySource { calls: AtomicUsize::new(0) });
        let adapter = PolledRestAdapter::new(source, Duration::from_millis(10));
        let pipeline = crate::pipeline::Pipeline::new(
            Arc::new(crate::dedup::InMemoryDeduplicator::new()),
            Arc::new(crate::symbol_filter::SymbolFilter::new([("Dome", vec!["BTCUSDT"])])),
            Arc::new(crate::metrics::MetricsRegistry::new()),
        );
        let writer = pipeline.writer();
        let (handle, shutdown) = crate::shutdown::shutdown_channel();

        let join = tokio::spawn(async move { adapter.start(writer, shutdown).await });
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.cancel();
        join.await.unwrap().unwrap();
    }
}
