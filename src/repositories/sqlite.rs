//! `rusqlite`-backed stand-in implementations of the repository contracts.
//! Schema mirrors the sketch in spec §6, minus daily partitioning (explicitly
//! out of scope: partition-lifecycle maintenance is an external collaborator
//! concern).

use super::{
    AlertHistoryRepository, AlertRuleRepository, CandleRepository, ExchangeStatusRepository,
    InstrumentRepository, PersistedTick, TickRepository,
};
use crate::domain::{
    AlertHistory, AlertRule, Candle, CandleInterval, ExchangeStatus, Instrument, RuleId, RuleKind,
    SourceType,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS instruments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    base TEXT NOT NULL,
    quote TEXT NOT NULL,
    UNIQUE(symbol, exchange)
);

CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument_id INTEGER NOT NULL,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    price TEXT NOT NULL,
    volume TEXT NOT NULL,
    event_timestamp INTEGER NOT NULL,
    received_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ticks_instrument_ts ON ticks(instrument_id, event_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_ticks_ts ON ticks(event_timestamp DESC);

CREATE TABLE IF NOT EXISTS candles (
    instrument_id INTEGER NOT NULL,
    interval TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    close_time INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    trades_count INTEGER NOT NULL,
    PRIMARY KEY (instrument_id, interval, open_time)
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    instrument_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    threshold TEXT NOT NULL,
    period_minutes INTEGER NOT NULL,
    active INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_histories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    instrument_id INTEGER NOT NULL,
    message TEXT NOT NULL,
    triggered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_histories_triggered_at ON alert_histories(triggered_at DESC);

CREATE TABLE IF NOT EXISTS exchange_status (
    exchange TEXT NOT NULL,
    source_type TEXT NOT NULL,
    is_online INTEGER NOT NULL,
    last_tick_at INTEGER,
    last_error TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (exchange, source_type)
);
"#;

fn to_db_err(e: rusqlite::Error) -> AppError {
    AppError::BackendUnavailable(e.to_string())
}

fn decimal_to_text(d: Decimal) -> String {
    d.to_string()
}

fn decimal_from_text(s: String) -> AppResult<Decimal> {
    Decimal::from_str(&s).map_err(|e| AppError::BackendUnavailable(format!("corrupt decimal column: {e}")))
}

fn interval_to_text(interval: CandleInterval) -> &'static str {
    interval.short_form()
}

fn ts_to_epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn epoch_to_ts(secs: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AppError::BackendUnavailable("out-of-range timestamp column".into()))
}

fn source_type_to_text(s: SourceType) -> &'static str {
    s.as_str()
}

fn source_type_from_text(s: &str) -> AppResult<SourceType> {
    match s {
        "streaming" => Ok(SourceType::Streaming),
        "polled" => Ok(SourceType::Polled),
        other => Err(AppError::BackendUnavailable(format!("unknown source_type column value: {other}"))),
    }
}

fn rule_kind_to_text(kind: RuleKind) -> &'static str {
    match kind {
        RuleKind::PriceAbove => "price_above",
        RuleKind::PriceBelow => "price_below",
        RuleKind::PriceChangePercent => "price_change_percent",
        RuleKind::VolumeSpike => "volume_spike",
        RuleKind::Volatility => "volatility",
    }
}

fn rule_kind_from_text(s: &str) -> AppResult<RuleKind> {
    match s {
        "price_above" => Ok(RuleKind::PriceAbove),
        "price_below" => Ok(RuleKind::PriceBelow),
        "price_change_percent" => Ok(RuleKind::PriceChangePercent),
        "volume_spike" => Ok(RuleKind::VolumeSpike),
        "volatility" => Ok(RuleKind::Volatility),
        other => Err(AppError::BackendUnavailable(format!("unknown rule kind column value: {other}"))),
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    next_instrument_id: AtomicI64,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let conn = Connection::open(path).map_err(to_db_err)?;
        conn.execute_batch(SCHEMA).map_err(to_db_err)?;
        Ok(Self { conn: Mutex::new(conn), next_instrument_id: AtomicI64::new(1) })
    }

    pub fn open_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_db_err)?;
        conn.execute_batch(SCHEMA).map_err(to_db_err)?;
        Ok(Self { conn: Mutex::new(conn), next_instrument_id: AtomicI64::new(1) })
    }
}

#[async_trait]
impl TickRepository for SqliteStore {
    async fn bulk_insert(&self, ticks: &[PersistedTick]) -> AppResult<()> {
        if ticks.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(to_db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO ticks (instrument_id, exchange, symbol, price, volume, event_timestamp, received_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(to_db_err)?;
            for t in ticks {
                stmt.execute(params![
                    t.instrument_id,
                    t.exchange,
                    t.symbol,
                    decimal_to_text(t.price),
                    decimal_to_text(t.volume),
                    ts_to_epoch(t.timestamp),
                    ts_to_epoch(t.received_at),
                ])
                .map_err(to_db_err)?;
            }
        }
        tx.commit().map_err(to_db_err)
    }
}

#[async_trait]
impl CandleRepository for SqliteStore {
    async fn bulk_upsert(&self, candles: &[Candle]) -> AppResult<()> {
        if candles.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(to_db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO candles (instrument_id, interval, open_time, close_time, open, high, low, close, volume, trades_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(instrument_id, interval, open_time) DO UPDATE SET
                        close_time = excluded.close_time,
                        open = excluded.open,
                        high = excluded.high,
                        low = excluded.low,
                        close = excluded.close,
                        volume = excluded.volume,
                        trades_count = excluded.trades_count",
                )
                .map_err(to_db_err)?;
            for c in candles {
                stmt.execute(params![
                    c.instrument_id,
                    interval_to_text(c.interval),
                    ts_to_epoch(c.open_time),
                    ts_to_epoch(c.close_time),
                    decimal_to_text(c.open),
                    decimal_to_text(c.high),
                    decimal_to_text(c.low),
                    decimal_to_text(c.close),
                    decimal_to_text(c.volume),
                    c.trades_count as i64,
                ])
                .map_err(to_db_err)?;
            }
        }
        tx.commit().map_err(to_db_err)
    }
}

#[async_trait]
impl InstrumentRepository for SqliteStore {
    async fn get_or_create(&self, symbol: &str, exchange: &str) -> AppResult<Instrument> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT id, base, quote FROM instruments WHERE symbol = ?1 AND exchange = ?2",
                params![symbol, exchange],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(to_db_err)?;

        if let Some((id, base, quote)) = existing {
            return Ok(Instrument { id, symbol: symbol.to_string(), exchange: exchange.to_string(), base, quote });
        }

        let instrument = Instrument::new(
            self.next_instrument_id.fetch_add(1, Ordering::Relaxed),
            symbol,
            exchange,
        );
        conn.execute(
            "INSERT INTO instruments (symbol, exchange, base, quote) VALUES (?1, ?2, ?3, ?4)",
            params![instrument.symbol, instrument.exchange, instrument.base, instrument.quote],
        )
        .map_err(to_db_err)?;
        let id = conn.last_insert_rowid();
        Ok(Instrument { id, ..instrument })
    }
}

#[async_trait]
impl AlertRuleRepository for SqliteStore {
    async fn get_all_active(&self) -> AppResult<Vec<AlertRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, instrument_id, kind, threshold, period_minutes, active, created_at FROM alert_rules WHERE active = 1")
            .map_err(to_db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })
            .map_err(to_db_err)?;

        let mut rules = Vec::new();
        for row in rows {
            let (id, name, instrument_id, kind, threshold, period_minutes, active, created_at) =
                row.map_err(to_db_err)?;
            rules.push(AlertRule {
                id,
                name,
                instrument_id,
                kind: rule_kind_from_text(&kind)?,
                threshold: decimal_from_text(threshold)?,
                period_minutes,
                active: active != 0,
                created_at: epoch_to_ts(created_at)?,
            });
        }
        Ok(rules)
    }

    async fn get_by_id(&self, id: RuleId) -> AppResult<Option<AlertRule>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, name, instrument_id, kind, threshold, period_minutes, active, created_at FROM alert_rules WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(to_db_err)?;

        match row {
            None => Ok(None),
            Some((id, name, instrument_id, kind, threshold, period_minutes, active, created_at)) => Ok(Some(AlertRule {
                id,
                name,
                instrument_id,
                kind: rule_kind_from_text(&kind)?,
                threshold: decimal_from_text(threshold)?,
                period_minutes,
                active: active != 0,
                created_at: epoch_to_ts(created_at)?,
            })),
        }
    }

    async fn create(&self, rule: AlertRule) -> AppResult<AlertRule> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alert_rules (name, instrument_id, kind, threshold, period_minutes, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.name,
                rule.instrument_id,
                rule_kind_to_text(rule.kind),
                decimal_to_text(rule.threshold),
                rule.period_minutes,
                rule.active as i64,
                ts_to_epoch(rule.created_at),
            ],
        )
        .map_err(to_db_err)?;
        let id = conn.last_insert_rowid();
        Ok(AlertRule { id, ..rule })
    }

    async fn update(&self, rule: AlertRule) -> AppResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE alert_rules SET name = ?1, instrument_id = ?2, kind = ?3, threshold = ?4, period_minutes = ?5, active = ?6 WHERE id = ?7",
                params![
                    rule.name,
                    rule.instrument_id,
                    rule_kind_to_text(rule.kind),
                    decimal_to_text(rule.threshold),
                    rule.period_minutes,
                    rule.active as i64,
                    rule.id,
                ],
            )
            .map_err(to_db_err)?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("alert rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: RuleId) -> AppResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute("DELETE FROM alert_rules WHERE id = ?1", params![id])
            .map_err(to_db_err)?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("alert rule {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertHistoryRepository for SqliteStore {
    async fn add(&self, entry: AlertHistory) -> AppResult<AlertHistory> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alert_histories (rule_id, instrument_id, message, triggered_at) VALUES (?1, ?2, ?3, ?4)",
            params![entry.rule_id, entry.instrument_id, entry.message, ts_to_epoch(entry.triggered_at)],
        )
        .map_err(to_db_err)?;
        let id = conn.last_insert_rowid();
        Ok(AlertHistory { id, ..entry })
    }

    async fn get(&self, from: DateTime<Utc>, to: DateTime<Utc>, limit: usize) -> AppResult<Vec<AlertHistory>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, rule_id, instrument_id, message, triggered_at FROM alert_histories
                 WHERE triggered_at >= ?1 AND triggered_at <= ?2 ORDER BY triggered_at DESC LIMIT ?3",
            )
            .map_err(to_db_err)?;
        let rows = stmt
            .query_map(params![ts_to_epoch(from), ts_to_epoch(to), limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(to_db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, rule_id, instrument_id, message, triggered_at) = row.map_err(to_db_err)?;
            out.push(AlertHistory { id, rule_id, instrument_id, message, triggered_at: epoch_to_ts(triggered_at)? });
        }
        Ok(out)
    }
}

#[async_trait]
impl ExchangeStatusRepository for SqliteStore {
    async fn upsert(&self, status: ExchangeStatus) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exchange_status (exchange, source_type, is_online, last_tick_at, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(exchange, source_type) DO UPDATE SET
                is_online = excluded.is_online,
                last_tick_at = excluded.last_tick_at,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
            params![
                status.exchange,
                source_type_to_text(status.source_type),
                status.is_online as i64,
                status.last_tick_at.map(ts_to_epoch),
                status.last_error,
                ts_to_epoch(status.updated_at),
            ],
        )
        .map_err(to_db_err)?;
        Ok(())
    }

    async fn get_all(&self) -> AppResult<Vec<ExchangeStatus>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT exchange, source_type, is_online, last_tick_at, last_error, updated_at FROM exchange_status")
            .map_err(to_db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(to_db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (exchange, source_type, is_online, last_tick_at, last_error, updated_at) = row.map_err(to_db_err)?;
            out.push(ExchangeStatus {
                exchange,
                source_type: source_type_from_text(&source_type)?,
                is_online: is_online != 0,
                last_tick_at: last_tick_at.map(epoch_to_ts).transpose()?,
                last_error,
                updated_at: epoch_to_ts(updated_at)?,
            });
        }
        Ok(out)
    }

    async fn get(&self, exchange: &str, source_type: SourceType) -> AppResult<Option<ExchangeStatus>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT exchange, source_type, is_online, last_tick_at, last_error, updated_at FROM exchange_status WHERE exchange = ?1 AND source_type = ?2",
                params![exchange, source_type_to_text(source_type)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(to_db_err)?;

        match row {
            None => Ok(None),
            Some((exchange, source_type, is_online, last_tick_at, last_error, updated_at)) => Ok(Some(ExchangeStatus {
                exchange,
                source_type: source_type_from_text(&source_type)?,
                is_online: is_online != 0,
                last_tick_at: last_tick_at.map(epoch_to_ts).transpose()?,
                last_error,
                updated_at: epoch_to_ts(updated_at)?,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn instrument_get_or_create_is_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        let a = store.get_or_create("BTCUSDT", "Binance").await.unwrap();
        let b = store.get_or_create("BTCUSDT", "Binance").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.base, "BTC");
        assert_eq!(a.quote, "USDT");
    }

    #[tokio::test]
    async fn candle_bulk_upsert_replaces_on_conflict() {
        let store = SqliteStore::open_memory().unwrap();
        let instrument = store.get_or_create("BTCUSDT", "Binance").await.unwrap();
        let open_time = CandleInterval::OneMinute.open_time_for(Utc::now());
        let mut candle = Candle::new(instrument.id, CandleInterval::OneMinute, open_time);
        candle.apply_tick(dec!(100), dec!(1));
        CandleRepository::bulk_upsert(&store, &[candle.clone()]).await.unwrap();

        candle.apply_tick(dec!(110), dec!(2));
        CandleRepository::bulk_upsert(&store, &[candle.clone()]).await.unwrap();

        let conn = store.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM candles", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        let high: String = conn.query_row("SELECT high FROM candles", [], |r| r.get(0)).unwrap();
        assert_eq!(high, "110");
    }
}
