//! Exchange adapter abstraction: lifecycle state machine, status reporting
//! and a shared reconnect-backoff calculator. Concrete adapters are in
//! [`binance`] and [`polled_rest`].

pub mod binance;
pub mod polled_rest;

use crate::domain::SourceType;
use crate::error::AppResult;
use crate::pipeline::PipelineWriter;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// `Idle -> Running -> Stopping -> Idle`. Disconnects of a streaming source
/// do not leave `Running`; only `Stop` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct AdapterStatus {
    pub exchange: String,
    pub source_type: SourceType,
    pub state: AdapterState,
    pub is_online: bool,
    pub last_tick_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

/// Shared, lock-protected status cell an adapter updates from its run loop
/// and `GetStatus` reads from any task.
#[derive(Debug)]
pub struct AdapterStatusCell(RwLock<AdapterStatus>);

impl AdapterStatusCell {
    pub fn new(exchange: impl Into<String>, source_type: SourceType) -> Self {
        Self(RwLock::new(AdapterStatus {
            exchange: exchange.into(),
            source_type,
            state: AdapterState::Idle,
            is_online: false,
            last_tick_at: None,
            last_error: None,
        }))
    }

    pub fn snapshot(&self) -> AdapterStatus {
        self.0.read().clone()
    }

    pub fn set_state(&self, state: AdapterState) {
        self.0.write().state = state;
    }

    pub fn set_online(&self, online: bool) {
        self.0.write().is_online = online;
    }

    pub fn record_tick(&self) {
        let mut guard = self.0.write();
        guard.is_online = true;
        guard.last_tick_at = Some(chrono::Utc::now());
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let mut guard = self.0.write();
        guard.is_online = false;
        guard.last_error = Some(error.into());
    }
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> &str;
    fn source_type(&self) -> SourceType;

    /// Begins producing raw ticks into `writer`; returns once `shutdown` is
    /// cancelled or the adapter is told to stop. Reconnection for streaming
    /// sources happens transparently inside this call.
    async fn start(&self, writer: PipelineWriter, shutdown: ShutdownSignal) -> AppResult<()>;

    fn status(&self) -> AdapterStatus;
}

/// Exponential backoff with jitter, capped at 30s, grounded on the
/// session-management backoff used for Binance WebSocket reconnects:
/// xorshift64 PRNG (no extra RNG dependency), multiplicative growth,
/// +/-30% jitter.
#[derive(Debug)]
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64 | 1)
                .unwrap_or(12345),
        }
    }

    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    pub fn next_backoff(&mut self) -> Duration {
        let base_ms = self.base.as_millis() as f64 * self.multiplier.powi(self.attempt as i32);
        let capped = base_ms.min(self.max.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter)
            .max(self.base.as_millis() as f64)
            .min(self.max.as_millis() as f64);

        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts consecutive errors so the poll loop can fall back to backoff
/// rather than hammering a degraded REST endpoint.
#[derive(Debug, Default)]
pub struct ErrorStreak(AtomicU64);

impl ErrorStreak {
    pub fn hit(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

pub(crate) async fn sleep_or_cancel(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[allow(dead_code)]
pub(crate) fn elapsed_since(instant: Instant) -> Duration {
    instant.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_30s() {
        let mut backoff = BackoffCalculator::new();
        let first = backoff.next_backoff();
        assert!(first >= Duration::from_millis(140) && first <= Duration::from_millis(260));

        for _ in 0..20 {
            let d = backoff.next_backoff();
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn backoff_resets_to_base_range() {
        let mut backoff = BackoffCalculator::new();
        for _ in 0..5 {
            backoff.next_backoff();
        }
        backoff.reset();
        let d = backoff.next_backoff();
        assert!(d <= Duration::from_millis(260));
    }
}
