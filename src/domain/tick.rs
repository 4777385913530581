//! Raw and normalized tick types.
//!
//! A [`RawTick`] is what an adapter hands to the pipeline, in the exchange's
//! native casing. A [`NormalizedTick`] is what every downstream stage
//! (dedup, symbol filter, aggregator, alert engine) actually operates on.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

/// Whether a tick arrived via a push (WebSocket) or pull (REST poll) feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceType {
    Streaming,
    Polled,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Streaming => "streaming",
            SourceType::Polled => "polled",
        }
    }
}

/// A trade tick exactly as reported by an adapter, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    pub exchange: String,
    pub source_type: SourceType,
    /// Symbol in the exchange's native casing (e.g. "btcusdt").
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl RawTick {
    pub fn new(
        exchange: impl Into<String>,
        source_type: SourceType,
        symbol: impl Into<String>,
        price: Decimal,
        volume: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            source_type,
            symbol: symbol.into(),
            price,
            volume,
            timestamp,
            received_at: Utc::now(),
        }
    }
}

/// A tick after canonicalization: upper-cased symbol, UTC timestamps, and a
/// derived dedup key that deliberately excludes `source_type`/`received_at`
/// so the streaming and polled views of the same trade collapse.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTick {
    pub exchange: String,
    pub source_type: SourceType,
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl NormalizedTick {
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.exchange,
            self.symbol,
            self.price,
            self.volume,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

impl From<RawTick> for NormalizedTick {
    fn from(raw: RawTick) -> Self {
        Self {
            exchange: raw.exchange,
            source_type: raw.source_type,
            symbol: raw.symbol.to_ascii_uppercase(),
            price: raw.price,
            volume: raw.volume,
            timestamp: raw.timestamp.with_timezone(&Utc),
            received_at: raw.received_at.with_timezone(&Utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(source: SourceType) -> RawTick {
        RawTick::new(
            "Binance",
            source,
            "btcusdt",
            dec!(50000),
            dec!(1.5),
            "2024-01-01T12:00:00Z".parse().unwrap(),
        )
    }

    #[test]
    fn normalize_upper_cases_symbol_and_forces_utc() {
        let normalized: NormalizedTick = tick(SourceType::Streaming).into();
        assert_eq!(normalized.symbol, "BTCUSDT");
        assert_eq!(chrono::Offset::fix(normalized.timestamp.offset()).local_minus_utc(), 0);
    }

    #[test]
    fn dedup_key_ignores_source_type_and_received_at() {
        let a: NormalizedTick = tick(SourceType::Streaming).into();
        let mut b: NormalizedTick = tick(SourceType::Polled).into();
        b.received_at = a.received_at + chrono::Duration::seconds(5);

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_differs_on_price() {
        let a: NormalizedTick = tick(SourceType::Streaming).into();
        let mut raw_b = tick(SourceType::Streaming);
        raw_b.price = dec!(50001);
        let b: NormalizedTick = raw_b.into();

        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
