//! Alert engine: the tick handler that scans active rules against every
//! tick, dispatches to the matching stateful evaluator, and fans out
//! cooldown-gated notifications.

pub mod evaluators;
pub mod notifications;

use crate::domain::{AlertHistory, InstrumentCache, NormalizedTick, RuleId};
use crate::error::AppResult;
use crate::pipeline::TickHandler;
use crate::repositories::{AlertHistoryRepository, AlertRuleRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evaluators::{Evaluator, PriceChangePercent, PriceThreshold, Volatility, VolumeSpike};
use notifications::NotificationChannel;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    pub cooldown_seconds: i64,
    pub max_concurrent_notifications: usize,
    /// How long the active-rule list is trusted before re-fetching from the
    /// repository. The spec's source material leaves the invalidation
    /// protocol unspecified; this crate picks a TTL refresh (see DESIGN.md).
    pub rule_cache_ttl_seconds: u64,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            max_concurrent_notifications: 10,
            rule_cache_ttl_seconds: 5,
        }
    }
}

struct RuleCache {
    rules: RwLock<Vec<crate::domain::AlertRule>>,
    last_refreshed: Mutex<Option<Instant>>,
}

pub struct AlertEngine {
    config: AlertEngineConfig,
    rule_repo: Arc<dyn AlertRuleRepository>,
    history_repo: Arc<dyn AlertHistoryRepository>,
    instruments: Arc<InstrumentCache>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    notify_gate: Arc<Semaphore>,
    cooldowns: Mutex<std::collections::HashMap<RuleId, DateTime<Utc>>>,
    rule_cache: RuleCache,
    price_threshold: PriceThreshold,
    price_change_percent: PriceChangePercent,
    volume_spike: VolumeSpike,
    volatility: Volatility,
}

impl AlertEngine {
    pub fn new(
        config: AlertEngineConfig,
        rule_repo: Arc<dyn AlertRuleRepository>,
        history_repo: Arc<dyn AlertHistoryRepository>,
        instruments: Arc<InstrumentCache>,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Arc<Self> {
        let notify_gate = Arc::new(Semaphore::new(config.max_concurrent_notifications));
        Arc::new(Self {
            config,
            rule_repo,
            history_repo,
            instruments,
            channels,
            notify_gate,
            cooldowns: Mutex::new(std::collections::HashMap::new()),
            rule_cache: RuleCache { rules: RwLock::new(Vec::new()), last_refreshed: Mutex::new(None) },
            price_threshold: PriceThreshold,
            price_change_percent: PriceChangePercent::default(),
            volume_spike: VolumeSpike::default(),
            volatility: Volatility::default(),
        })
    }

    async fn active_rules(&self) -> AppResult<Vec<crate::domain::AlertRule>> {
        let needs_refresh = {
            let last = self.rule_cache.last_refreshed.lock();
            match *last {
                None => true,
                Some(t) => t.elapsed().as_secs() >= self.config.rule_cache_ttl_seconds,
            }
        };

        if needs_refresh {
            let fresh = self.rule_repo.get_all_active().await?;
            *self.rule_cache.rules.write() = fresh.clone();
            *self.rule_cache.last_refreshed.lock() = Some(Instant::now());
            return Ok(fresh);
        }

        Ok(self.rule_cache.rules.read().clone())
    }

    fn evaluator_for(&self, kind: crate::domain::RuleKind) -> &dyn Evaluator {
        if self.price_threshold.can_evaluate(kind) {
            &self.price_threshold
        } else if self.price_change_percent.can_evaluate(kind) {
            &self.price_change_percent
        } else if self.volume_spike.can_evaluate(kind) {
            &self.volume_spike
        } else {
            &self.volatility
        }
    }

    fn in_cooldown(&self, rule_id: RuleId, now: DateTime<Utc>) -> bool {
        let cooldowns = self.cooldowns.lock();
        match cooldowns.get(&rule_id) {
            Some(last) => now - *last < chrono::Duration::seconds(self.config.cooldown_seconds),
            None => false,
        }
    }

    fn stamp_cooldown(&self, rule_id: RuleId, now: DateTime<Utc>) {
        self.cooldowns.lock().insert(rule_id, now);
    }

    async fn notify_all(&self, message: &str) {
        let mut handles = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let channel = channel.clone();
            let gate = self.notify_gate.clone();
            let message = message.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                if let Err(e) = channel.send(&message).await {
                    error!(channel = channel.name(), error = %e, "notification channel failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl TickHandler for AlertEngine {
    fn name(&self) -> &str {
        "alert_engine"
    }

    async fn handle(&self, tick: &NormalizedTick) -> AppResult<()> {
        let instrument = match self.instruments.get(&tick.symbol, &tick.exchange) {
            Some(i) => i,
            None => return Ok(()),
        };

        let rules = self.active_rules().await?;
        let now = Utc::now();

        for rule in rules.iter().filter(|r| r.instrument_id == instrument.id) {
            let evaluator = self.evaluator_for(rule.kind);
            let Some(message) = evaluator.evaluate(rule, tick) else { continue };

            if self.in_cooldown(rule.id, now) {
                continue;
            }
            self.stamp_cooldown(rule.id, now);

            let entry = AlertHistory { id: 0, rule_id: rule.id, instrument_id: instrument.id, message: message.clone(), triggered_at: now };
            if let Err(e) = self.history_repo.add(entry).await {
                error!(rule_id = rule.id, error = %e, "failed to persist alert history");
            }

            info!(rule_id = rule.id, symbol = %tick.symbol, "{}", message);
            self.notify_all(&message).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertRule, Instrument, RuleKind, SourceType};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticRuleRepo(Vec<AlertRule>);

    #[async_trait]
    impl AlertRuleRepository for StaticRuleRepo {
        async fn get_all_active(&self) -> AppResult<Vec<AlertRule>> {
            Ok(self.0.clone())
        }
        async fn get_by_id(&self, id: RuleId) -> AppResult<Option<AlertRule>> {
            Ok(self.0.iter().find(|r| r.id == id).cloned())
        }
        async fn create(&self, rule: AlertRule) -> AppResult<AlertRule> {
            Ok(rule)
        }
        async fn update(&self, _rule: AlertRule) -> AppResult<()> {
            Ok(())
        }
        async fn delete(&self, _id: RuleId) -> AppResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHistoryRepo {
        count: AtomicUsize,
    }

    #[async_trait]
    impl AlertHistoryRepository for CountingHistoryRepo {
        async fn add(&self, entry: AlertHistory) -> AppResult<AlertHistory> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(entry)
        }
        async fn get(&self, _from: DateTime<Utc>, _to: DateTime<Utc>, _limit: usize) -> AppResult<Vec<AlertHistory>> {
            Ok(Vec::new())
        }
    }

    struct CountingChannel(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }
        async fn send(&self, _message: &str) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tick(price: rust_decimal::Decimal, ts: DateTime<Utc>) -> NormalizedTick {
        crate::domain::RawTick::new("Binance", SourceType::Streaming, "BTCUSDT", price, dec!(1), ts).into()
    }

    #[tokio::test]
    async fn s3_price_above_fires_once_then_respects_cooldown() {
        let instruments = Arc::new(InstrumentCache::new());
        instruments.insert_if_missing(Instrument::new(1, "BTCUSDT", "Binance"));
        let rule = AlertRule::new(1, "btc-high", 1, RuleKind::PriceAbove, dec!(50000));
        let history = Arc::new(CountingHistoryRepo::default());
        let notify_count = Arc::new(AtomicUsize::new(0));

        let engine = AlertEngine::new(
            AlertEngineConfig::default(),
            Arc::new(StaticRuleRepo(vec![rule])),
            history.clone(),
            instruments,
            vec![Arc::new(CountingChannel(notify_count.clone()))],
        );

        let t0 = Utc::now();
        engine.handle(&tick(dec!(50001), t0)).await.unwrap();
        engine.handle(&tick(dec!(50001), t0 + chrono::Duration::seconds(5))).await.unwrap();

        assert_eq!(history.count.load(Ordering::SeqCst), 1, "cooldown must suppress the second trigger");
        assert_eq!(notify_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_instrument_is_skipped_without_error() {
        let engine = AlertEngine::new(
            AlertEngineConfig::default(),
            Arc::new(StaticRuleRepo(vec![])),
            Arc::new(CountingHistoryRepo::default()),
            Arc::new(InstrumentCache::new()),
            vec![],
        );
        engine.handle(&tick(dec!(1), Utc::now())).await.unwrap();
    }
}
