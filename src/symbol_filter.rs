//! Allow-list check. Pure, thread-safe, built once at startup from the
//! union of per-exchange configured symbols.

use crate::domain::NormalizedTick;
use std::collections::{HashMap, HashSet};

pub struct SymbolFilter {
    allowed_by_exchange: HashMap<String, HashSet<String>>,
}

impl SymbolFilter {
    /// `exchanges` is the configured `(exchange, symbols)` list.
    pub fn new<I, S, T>(exchanges: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: IntoIterator<Item = S>,
    {
        let mut allowed_by_exchange = HashMap::new();
        for (exchange, symbols) in exchanges {
            let set: HashSet<String> = symbols
                .into_iter()
                .map(|s| s.into().to_ascii_uppercase())
                .collect();
            allowed_by_exchange.insert(exchange.into(), set);
        }
        Self { allowed_by_exchange }
    }

    pub fn is_allowed(&self, tick: &NormalizedTick) -> bool {
        self.allowed_by_exchange
            .get(&tick.exchange)
            .map(|symbols| symbols.contains(&tick.symbol))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceType;
    use rust_decimal_macros::dec;

    fn tick(exchange: &str, symbol: &str) -> NormalizedTick {
        crate::domain::RawTick::new(
            exchange,
            SourceType::Streaming,
            symbol,
            dec!(1),
            dec!(1),
            chrono::Utc::now(),
        )
        .into()
    }

    #[test]
    fn allows_case_insensitively_configured_symbols() {
        let filter = SymbolFilter::new([("Binance", vec!["btcusdt", "ethusdt"])]);
        assert!(filter.is_allowed(&tick("Binance", "btcusdt")));
        assert!(!filter.is_allowed(&tick("Binance", "dogeusdt")));
        assert!(!filter.is_allowed(&tick("Coinbase", "btcusdt")));
    }
}
