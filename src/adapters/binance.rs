//! WebSocket push adapter for Binance trade streams.
//!
//! Grounded on the connect-subscribe-reconnect loop in
//! `scrapers::binance_session`/`scrapers::polymarket_ws`, adapted from
//! book-ticker frames to the combined-stream trade frame shape.

use super::{sleep_or_cancel, AdapterState, AdapterStatus, AdapterStatusCell, BackoffCalculator, ExchangeAdapter};
use crate::domain::{RawTick, SourceType};
use crate::error::{AppError, AppResult};
use crate::pipeline::PipelineWriter;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const DEFAULT_ENDPOINT: &str = "wss://stream.binance.com:9443/stream";

#[derive(serde::Deserialize)]
struct CombinedFrame {
    data: TradeFrame,
}

#[derive(serde::Deserialize)]
struct TradeFrame {
    s: String,
    p: String,
    q: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

pub struct BinanceStreamAdapter {
    symbols: Vec<String>,
    endpoint: String,
    status: Arc<AdapterStatusCell>,
}

impl BinanceStreamAdapter {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            status: Arc::new(AdapterStatusCell::new("Binance", SourceType::Streaming)),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn stream_url(&self) -> String {
        let streams = self
            .symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}?streams={}", self.endpoint, streams)
    }

    async fn connect_and_stream(
        &self,
        writer: &PipelineWriter,
        shutdown: &mut ShutdownSignal,
        backoff: &mut BackoffCalculator,
    ) -> AppResult<()> {
        let url = self.stream_url();
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| AppError::BackendUnavailable(format!("binance connect failed: {e}")))?;
        info!(exchange = "Binance", "websocket connected");
        self.status.set_online(true);
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text, writer).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(AppError::BackendUnavailable(format!("binance stream error: {e}")));
                        }
                        None => {
                            return Err(AppError::BackendUnavailable("binance stream closed".into()));
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str, writer: &PipelineWriter) {
        let frame: CombinedFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                debug!(exchange = "Binance", error = %e, "ignoring unparsable frame");
                return;
            }
        };

        let (price, volume) = match (Decimal::from_str(&frame.data.p), Decimal::from_str(&frame.data.q)) {
            (Ok(p), Ok(q)) => (p, q),
            _ => {
                warn!(exchange = "Binance", "ignoring frame with unparsable price/quantity");
                return;
            }
        };

        let timestamp = Utc
            .timestamp_millis_opt(frame.data.trade_time_ms)
            .single()
            .unwrap_or_else(Utc::now);

        self.status.record_tick();
        let tick = RawTick::new("Binance", SourceType::Streaming, frame.data.s, price, volume, timestamp);
        if writer.write(tick).await.is_err() {
            warn!(exchange = "Binance", "pipeline writer rejected tick during shutdown");
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceStreamAdapter {
    fn exchange(&self) -> &str {
        "Binance"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Streaming
    }

    async fn start(&self, writer: PipelineWriter, mut shutdown: ShutdownSignal) -> AppResult<()> {
        self.status.set_state(AdapterState::Running);
        let mut backoff = BackoffCalculator::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.connect_and_stream(&writer, &mut shutdown, &mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    self.status.record_error(e.to_string());
                    let wait = backoff.next_backoff();
                    warn!(exchange = "Binance", error = %e, backoff_ms = wait.as_millis() as u64, "reconnecting");
                    if sleep_or_cancel(wait, &mut shutdown).await {
                        break;
                    }
                }
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
