//! OHLCV candle type and the per-key apply operation.

use super::instrument::InstrumentId;
use super::interval::CandleInterval;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub type CandleKey = (InstrumentId, CandleInterval, DateTime<Utc>);

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub instrument_id: InstrumentId,
    pub interval: CandleInterval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades_count: u64,
}

impl Candle {
    pub fn new(instrument_id: InstrumentId, interval: CandleInterval, open_time: DateTime<Utc>) -> Self {
        Self {
            instrument_id,
            interval,
            open_time,
            close_time: interval.close_time_for(open_time),
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            trades_count: 0,
        }
    }

    pub fn key(&self) -> CandleKey {
        (self.instrument_id, self.interval, self.open_time)
    }

    /// `if trades_count == 0 -> open = p; high = max(high, p);
    ///  low = (low == 0 ? p : min(low, p)); close = p; volume += v; trades_count++`
    pub fn apply_tick(&mut self, price: Decimal, volume: Decimal) {
        if self.trades_count == 0 {
            self.open = price;
            self.high = price;
            self.low = price;
        } else {
            if price > self.high {
                self.high = price;
            }
            self.low = if self.low.is_zero() { price } else { self.low.min(price) };
        }
        self.close = price;
        self.volume += volume;
        self.trades_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    // S2 from the acceptance scenarios: four ticks inside one 1-minute bucket.
    #[test]
    fn s2_ohlcv_within_one_minute_bucket() {
        let open_time = CandleInterval::OneMinute.open_time_for(t("2024-01-01T12:00:05Z"));
        let mut candle = Candle::new(1, CandleInterval::OneMinute, open_time);

        candle.apply_tick(dec!(100), dec!(1));
        candle.apply_tick(dec!(110), dec!(2));
        candle.apply_tick(dec!(95), dec!(1));
        candle.apply_tick(dec!(105), dec!(1));

        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.high, dec!(110));
        assert_eq!(candle.low, dec!(95));
        assert_eq!(candle.close, dec!(105));
        assert_eq!(candle.volume, dec!(5));
        assert_eq!(candle.trades_count, 4);
        assert_eq!(candle.open_time, t("2024-01-01T12:00:00Z"));
        assert_eq!(candle.close_time, t("2024-01-01T12:01:00Z"));
    }

    #[test]
    fn invariant_low_le_open_close_le_high() {
        let mut candle = Candle::new(1, CandleInterval::OneMinute, t("2024-01-01T00:00:00Z"));
        for p in [50, 70, 30, 90, 40] {
            candle.apply_tick(Decimal::from(p), dec!(1));
        }
        assert!(candle.low <= candle.open);
        assert!(candle.open <= candle.high);
        assert!(candle.low <= candle.close);
        assert!(candle.close <= candle.high);
        assert!(candle.low <= candle.high);
    }
}
