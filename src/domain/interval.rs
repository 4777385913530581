//! Candle interval enum and the truncation arithmetic shared by the
//! aggregator and the alert engine's rolling windows.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 3] = [
        CandleInterval::OneMinute,
        CandleInterval::FiveMinutes,
        CandleInterval::OneHour,
    ];

    /// Canonical wire/persistence short form, e.g. `"1m"`.
    pub fn short_form(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::OneHour => "1h",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => 60,
            CandleInterval::FiveMinutes => 5 * 60,
            CandleInterval::OneHour => 60 * 60,
        }
    }

    /// `open_time = floor(tick.timestamp / interval) * interval`.
    pub fn open_time_for(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let step = self.seconds();
        let truncated = secs.div_euclid(step) * step;
        Utc.timestamp_opt(truncated, 0).single().expect("in-range timestamp")
    }

    pub fn close_time_for(&self, open_time: DateTime<Utc>) -> DateTime<Utc> {
        open_time + chrono::Duration::seconds(self.seconds())
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_form())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_minute_boundary() {
        let t: DateTime<Utc> = "2024-01-01T12:00:55Z".parse().unwrap();
        let open = CandleInterval::OneMinute.open_time_for(t);
        assert_eq!(open, "2024-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap());
        let close = CandleInterval::OneMinute.close_time_for(open);
        assert_eq!(close, "2024-01-01T12:01:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn short_forms_match_wire_contract() {
        assert_eq!(CandleInterval::OneMinute.short_form(), "1m");
        assert_eq!(CandleInterval::FiveMinutes.short_form(), "5m");
        assert_eq!(CandleInterval::OneHour.short_form(), "1h");
    }
}
