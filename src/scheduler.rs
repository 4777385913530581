//! Background periodic tasks: the status probe loop. The candle flush loop
//! lives next to the aggregator it drives (`aggregator::run_flush_loop`).

use crate::adapters::ExchangeAdapter;
use crate::domain::ExchangeStatus;
use crate::repositories::ExchangeStatusRepository;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub async fn run_status_probe_loop(
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    status_repo: Arc<dyn ExchangeStatusRepository>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("status probe loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                for adapter in &adapters {
                    let status = adapter.status();
                    let record = ExchangeStatus {
                        exchange: status.exchange,
                        source_type: status.source_type,
                        is_online: status.is_online,
                        last_tick_at: status.last_tick_at,
                        last_error: status.last_error,
                        updated_at: chrono::Utc::now(),
                    };
                    if let Err(e) = status_repo.upsert(record).await {
                        error!(exchange = adapter.exchange(), error = %e, "failed to persist exchange status");
                    }
                }
            }
        }
    }
}
