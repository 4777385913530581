//! Alert rule and history types.

use super::instrument::InstrumentId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub type RuleId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RuleKind {
    PriceAbove,
    PriceBelow,
    PriceChangePercent,
    VolumeSpike,
    Volatility,
}

pub const DEFAULT_PERIOD_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: RuleId,
    pub name: String,
    pub instrument_id: InstrumentId,
    pub kind: RuleKind,
    pub threshold: Decimal,
    pub period_minutes: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        id: RuleId,
        name: impl Into<String>,
        instrument_id: InstrumentId,
        kind: RuleKind,
        threshold: Decimal,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            instrument_id,
            kind,
            threshold,
            period_minutes: DEFAULT_PERIOD_MINUTES,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_period_minutes(mut self, minutes: i64) -> Self {
        self.period_minutes = minutes;
        self
    }

    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.period_minutes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertHistory {
    pub id: i64,
    pub rule_id: RuleId,
    pub instrument_id: InstrumentId,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}
