//! Per-(exchange, source-type) adapter status, owned by producers and
//! periodically snapshotted by the status loop.

use super::tick::SourceType;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeStatusKey {
    pub exchange: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub source_type: SourceType,
    pub is_online: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeStatus {
    pub fn idle(exchange: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            exchange: exchange.into(),
            source_type,
            is_online: false,
            last_tick_at: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}
