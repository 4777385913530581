//! Stateful per-rule evaluators. Each evaluator owns its own windows behind
//! a `Mutex<HashMap<RuleId, _>>` keyed by rule id, so two rules against the
//! same symbol with different thresholds/periods never share a window.

use crate::domain::{AlertRule, NormalizedTick, RuleId, RuleKind};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

type SlidingWindow = VecDeque<(chrono::DateTime<chrono::Utc>, Decimal)>;

pub trait Evaluator: Send + Sync {
    fn can_evaluate(&self, kind: RuleKind) -> bool;
    /// Returns `Some(message)` if the rule triggers on this tick.
    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String>;
}

#[derive(Default)]
pub struct PriceThreshold;

impl Evaluator for PriceThreshold {
    fn can_evaluate(&self, kind: RuleKind) -> bool {
        matches!(kind, RuleKind::PriceAbove | RuleKind::PriceBelow)
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let triggered = match rule.kind {
            RuleKind::PriceAbove => tick.price > rule.threshold,
            RuleKind::PriceBelow => tick.price < rule.threshold,
            _ => false,
        };
        triggered.then(|| format!("{} price {} crossed threshold {} ({})", tick.symbol, tick.price, rule.threshold, rule.name))
    }
}

#[derive(Default)]
pub struct PriceChangePercent {
    baselines: Mutex<HashMap<RuleId, (Decimal, chrono::DateTime<chrono::Utc>)>>,
}

impl Evaluator for PriceChangePercent {
    fn can_evaluate(&self, kind: RuleKind) -> bool {
        matches!(kind, RuleKind::PriceChangePercent)
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let mut baselines = self.baselines.lock();
        let period = rule.period();

        let (first_price, period_start) = match baselines.get(&rule.id).copied() {
            None => {
                baselines.insert(rule.id, (tick.price, tick.timestamp));
                return None;
            }
            Some(state) => state,
        };

        if tick.timestamp - period_start > period {
            baselines.insert(rule.id, (tick.price, tick.timestamp));
            return None;
        }

        if first_price.is_zero() {
            return None;
        }

        let change = (tick.price - first_price) / first_price * Decimal::from(100);
        (change.abs() > rule.threshold)
            .then(|| format!("{} moved {:.2}% against baseline {} (rule {})", tick.symbol, change, first_price, rule.name))
    }
}

#[derive(Default)]
pub struct VolumeSpike {
    windows: Mutex<HashMap<RuleId, SlidingWindow>>,
}

impl Evaluator for VolumeSpike {
    fn can_evaluate(&self, kind: RuleKind) -> bool {
        matches!(kind, RuleKind::VolumeSpike)
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let mut windows = self.windows.lock();
        let window = windows.entry(rule.id).or_default();
        let period = rule.period();

        window.push_back((tick.timestamp, tick.volume));
        while let Some((ts, _)) = window.front() {
            if tick.timestamp - *ts > period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < 2 {
            return None;
        }

        let (sum, count) = window
            .iter()
            .rev()
            .skip(1)
            .fold((Decimal::ZERO, 0u32), |(sum, count), (_, v)| (sum + *v, count + 1));
        if count == 0 {
            return None;
        }
        let avg = sum / Decimal::from(count);
        if avg.is_zero() {
            return None;
        }

        let ratio = tick.volume / avg;
        (ratio > rule.threshold).then(|| format!("{} volume spike ratio {:.2}x average (rule {})", tick.symbol, ratio, rule.name))
    }
}

#[derive(Default)]
pub struct Volatility {
    windows: Mutex<HashMap<RuleId, SlidingWindow>>,
}

impl Evaluator for Volatility {
    fn can_evaluate(&self, kind: RuleKind) -> bool {
        matches!(kind, RuleKind::Volatility)
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let mut windows = self.windows.lock();
        let window = windows.entry(rule.id).or_default();
        let period = rule.period();

        window.push_back((tick.timestamp, tick.price));
        while let Some((ts, _)) = window.front() {
            if tick.timestamp - *ts > period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < 3 {
            return None;
        }

        let prices: Vec<Decimal> = window.iter().map(|(_, p)| *p).collect();
        let returns: Vec<f64> = prices
            .windows(2)
            .filter(|pair| !pair[0].is_zero())
            .map(|pair| {
                let r = (pair[1] - pair[0]) / pair[0] * Decimal::from(100);
                r.to_f64().unwrap_or(0.0)
            })
            .collect();

        if returns.is_empty() {
            return None;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let stddev = variance.sqrt();

        let threshold = rule.threshold.to_f64().unwrap_or(f64::MAX);
        (stddev > threshold).then(|| format!("{} volatility {:.4} exceeds threshold {} (rule {})", tick.symbol, stddev, rule.threshold, rule.name))
    }
}
