//! Instrument identity and the base/quote currency split.

use std::collections::HashMap;

pub type InstrumentId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub id: InstrumentId,
    pub symbol: String,
    pub exchange: String,
    pub base: String,
    pub quote: String,
}

/// Longest-suffix match against a known list of quote currencies, falling
/// back to a mid-point split for symbols too long to plausibly be a known
/// quote-less pair.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH", "BNB"];

pub fn split_base_quote(symbol: &str) -> (String, String) {
    let mut candidates: Vec<&&str> = KNOWN_QUOTES.iter().collect();
    candidates.sort_by_key(|q| std::cmp::Reverse(q.len()));

    for quote in candidates {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            let split_at = symbol.len() - quote.len();
            return (symbol[..split_at].to_string(), symbol[split_at..].to_string());
        }
    }

    if symbol.len() >= 6 {
        let mid = symbol.len() / 2;
        (symbol[..mid].to_string(), symbol[mid..].to_string())
    } else {
        (symbol.to_string(), String::new())
    }
}

impl Instrument {
    pub fn new(id: InstrumentId, symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let (base, quote) = split_base_quote(&symbol);
        Self {
            id,
            symbol,
            exchange: exchange.into(),
            base,
            quote,
        }
    }
}

/// Key used to cache and look up instruments: unique by (symbol, exchange).
pub type InstrumentKey = (String, String);

pub fn instrument_key(symbol: &str, exchange: &str) -> InstrumentKey {
    (symbol.to_string(), exchange.to_string())
}

/// In-process, add-if-missing instrument cache keyed by (symbol, exchange).
/// Populated lazily on first observed tick; writes are idempotent.
#[derive(Debug, Default)]
pub struct InstrumentCache {
    by_key: parking_lot::RwLock<HashMap<InstrumentKey, Instrument>>,
}

impl InstrumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str, exchange: &str) -> Option<Instrument> {
        self.by_key
            .read()
            .get(&instrument_key(symbol, exchange))
            .cloned()
    }

    /// Inserts `instrument` iff no entry exists yet for its key, returning
    /// whichever instrument now occupies the slot (idempotent add-if-missing).
    pub fn insert_if_missing(&self, instrument: Instrument) -> Instrument {
        let key = instrument_key(&instrument.symbol, &instrument.exchange);
        let mut guard = self.by_key.write();
        guard.entry(key).or_insert(instrument).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_longest_known_quote_suffix() {
        assert_eq!(split_base_quote("BTCUSDT"), ("BTC".into(), "USDT".into()));
        assert_eq!(split_base_quote("ETHBTC"), ("ETH".into(), "BTC".into()));
        assert_eq!(split_base_quote("SOLUSD"), ("SOL".into(), "USD".into()));
    }

    #[test]
    fn falls_back_to_mid_split_for_unknown_quote() {
        // "ABCDEF" ends with none of the known quotes -> mid split at len/2 = 3.
        assert_eq!(split_base_quote("ABCDEF"), ("ABC".into(), "DEF".into()));
    }

    #[test]
    fn cache_insert_if_missing_is_idempotent() {
        let cache = InstrumentCache::new();
        let first = cache.insert_if_missing(Instrument::new(1, "BTCUSDT", "Binance"));
        let second = cache.insert_if_missing(Instrument::new(2, "BTCUSDT", "Binance"));
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, 1);
    }
}
