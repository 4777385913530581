//! tick-aggregator: real-time crypto market-data aggregator.
//!
//! Wires config -> metrics -> instrument cache -> candle aggregator + alert
//! engine -> pipeline (handlers registered before start) -> adapters ->
//! background flush/status loops, then awaits a shutdown signal and drains.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tick_aggregator::adapters::binance::BinanceStreamAdapter;
use tick_aggregator::adapters::ExchangeAdapter;
use tick_aggregator::aggregator::{run_flush_loop, AggregatorConfig, CandleAggregator};
use tick_aggregator::alerts::notifications::{ConsoleChannel, FileChannel, NotificationChannel, StubEmailChannel};
use tick_aggregator::alerts::{AlertEngine, AlertEngineConfig};
use tick_aggregator::config::Config;
use tick_aggregator::dedup::InMemoryDeduplicator;
use tick_aggregator::domain::InstrumentCache;
use tick_aggregator::metrics::MetricsRegistry;
use tick_aggregator::pipeline::Pipeline;
use tick_aggregator::repositories::sqlite::SqliteStore;
use tick_aggregator::scheduler::run_status_probe_loop;
use tick_aggregator::shutdown::shutdown_channel;
use tick_aggregator::symbol_filter::SymbolFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Real-time crypto market-data aggregator.
#[derive(Parser, Debug)]
#[command(name = "tick-aggregator", version)]
struct Cli {
    /// Path to a TOML config file. Defaults to $TICK_AGGREGATOR_CONFIG_PATH
    /// or ./config.toml, falling back to built-in defaults if absent.
    #[arg(short, long, env = "TICK_AGGREGATOR_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_path_or_env(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(exchanges = config.exchanges.len(), "tick-aggregator starting");

    let store = Arc::new(SqliteStore::open(&config.database_url).context("failed to open database")?);
    let metrics = Arc::new(MetricsRegistry::new());
    let instruments = Arc::new(InstrumentCache::new());

    let symbol_filter = Arc::new(SymbolFilter::new(
        config.exchanges.iter().map(|e| (e.exchange.clone(), e.symbols.clone())),
    ));
    let dedup = Arc::new(InMemoryDeduplicator::new());

    let pipeline = Pipeline::new(dedup, symbol_filter, metrics.clone());

    let aggregator_config = AggregatorConfig {
        tick_buffer_size: config.tick_buffer_size,
        flush_interval_seconds: config.flush_interval_seconds,
        candle_intervals: config.candle_intervals.clone(),
        in_memory_candle_retention_minutes: config.in_memory_candle_retention_minutes,
    };
    let aggregator = CandleAggregator::new(
        aggregator_config,
        instruments.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        metrics.clone(),
    );

    let channels: Vec<Arc<dyn NotificationChannel>> = config
        .channels
        .iter()
        .filter(|c| c.enabled)
        .filter_map(|c| -> Option<Arc<dyn NotificationChannel>> {
            match c.kind.as_str() {
                "console" => Some(Arc::new(ConsoleChannel)),
                "email" => Some(Arc::new(StubEmailChannel)),
                "file" => {
                    let path = c.settings.get("path").cloned().unwrap_or_else(|| "alerts.log".to_string());
                    match FileChannel::new(path) {
                        Ok(channel) => Some(Arc::new(channel)),
                        Err(e) => {
                            tracing::error!(channel = %c.name, error = %e, "failed to initialize file channel, skipping");
                            None
                        }
                    }
                }
                other => {
                    tracing::warn!(kind = other, "unknown channel type, skipping");
                    None
                }
            }
        })
        .collect();

    let alert_engine = AlertEngine::new(
        AlertEngineConfig {
            cooldown_seconds: config.cooldown_seconds,
            max_concurrent_notifications: config.max_concurrent_notifications,
            ..AlertEngineConfig::default()
        },
        store.clone(),
        store.clone(),
        instruments,
        channels,
    );

    pipeline
        .register_handler(aggregator.clone())
        .context("register aggregator handler")?;
    pipeline
        .register_handler(alert_engine)
        .context("register alert engine handler")?;

    let (shutdown_handle, shutdown_signal) = shutdown_channel();
    let consumer = pipeline.start(shutdown_signal.clone()).context("start pipeline")?;

    let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::new();
    let mut adapter_tasks = Vec::new();
    for exchange in &config.exchanges {
        if exchange.exchange.eq_ignore_ascii_case("binance") {
            let adapter: Arc<dyn ExchangeAdapter> = Arc::new(BinanceStreamAdapter::new(exchange.symbols.clone()));
            adapters.push(adapter.clone());
            let writer = pipeline.writer();
            let shutdown = shutdown_signal.clone();
            adapter_tasks.push(tokio::spawn(async move {
                if let Err(e) = adapter.start(writer, shutdown).await {
                    tracing::error!(error = %e, "adapter exited with error");
                }
            }));
        } else {
            tracing::warn!(exchange = %exchange.exchange, "no shipped adapter for this exchange; configure a PolledRestAdapter source in code");
        }
    }

    let flush_task = tokio::spawn(run_flush_loop(aggregator, shutdown_signal.clone()));
    let status_task = tokio::spawn(run_status_probe_loop(
        adapters,
        store,
        Duration::from_secs(config.status_probe_interval_seconds),
        shutdown_signal,
    ));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, draining");
    shutdown_handle.cancel();

    let _ = consumer.await;
    let _ = flush_task.await;
    let _ = status_task.await;
    for task in adapter_tasks {
        let _ = task.await;
    }

    tracing::info!("tick-aggregator stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tick_aggregator=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
