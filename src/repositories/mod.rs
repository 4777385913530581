//! Persistence contracts consumed by the core. Implementations are, per
//! spec, an external collaborator concern — this module ships one
//! concrete, `rusqlite`-backed stand-in per trait so the pipeline, the
//! aggregator and the alert engine can be exercised and tested end to end
//! without depending on a production datastore.

pub mod sqlite;

use crate::domain::{AlertHistory, AlertRule, Candle, ExchangeStatus, Instrument, RuleId, SourceType};
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A single raw tick as it is handed to the bulk tick buffer flush, after
/// instrument resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTick {
    pub instrument_id: crate::domain::InstrumentId,
    pub exchange: String,
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait TickRepository: Send + Sync {
    /// Idempotency is not required: duplicates are possible if dedup missed
    /// and the caller tolerates them.
    async fn bulk_insert(&self, ticks: &[PersistedTick]) -> AppResult<()>;
}

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Upsert key is (instrument_id, interval, open_time); replaces
    /// OHLCV/volume/trades_count/close_time on conflict.
    async fn bulk_upsert(&self, candles: &[Candle]) -> AppResult<()>;
}

#[async_trait]
pub trait InstrumentRepository: Send + Sync {
    /// Returns the existing instrument or creates one; base/quote split is
    /// the repository's responsibility.
    async fn get_or_create(&self, symbol: &str, exchange: &str) -> AppResult<Instrument>;
}

#[async_trait]
pub trait AlertRuleRepository: Send + Sync {
    async fn get_all_active(&self) -> AppResult<Vec<AlertRule>>;
    async fn get_by_id(&self, id: RuleId) -> AppResult<Option<AlertRule>>;
    async fn create(&self, rule: AlertRule) -> AppResult<AlertRule>;
    async fn update(&self, rule: AlertRule) -> AppResult<()>;
    async fn delete(&self, id: RuleId) -> AppResult<()>;
}

#[async_trait]
pub trait AlertHistoryRepository: Send + Sync {
    async fn add(&self, entry: AlertHistory) -> AppResult<AlertHistory>;
    async fn get(&self, from: DateTime<Utc>, to: DateTime<Utc>, limit: usize) -> AppResult<Vec<AlertHistory>>;
}

#[async_trait]
pub trait ExchangeStatusRepository: Send + Sync {
    /// Keyed by (exchange, source_type).
    async fn upsert(&self, status: ExchangeStatus) -> AppResult<()>;
    async fn get_all(&self) -> AppResult<Vec<ExchangeStatus>>;
    async fn get(&self, exchange: &str, source_type: SourceType) -> AppResult<Option<ExchangeStatus>>;
}
