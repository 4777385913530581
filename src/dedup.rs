//! Time-windowed deduplication.
//!
//! The dedup key is added to a set keyed by `dedup:<YYYYMMDDHHMM>` (the UTC
//! minute bucket derived from the tick's event timestamp). The bucket gets a
//! 60s TTL only on the transition from absent to present; the tick is unique
//! iff the add reports "newly added". Modeled after a Redis `SADD` +
//! `EXPIRE NX`-style contract so a real external store (e.g. `redis-rs`)
//! could be slotted in without changing the trait.

use crate::domain::NormalizedTick;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

const BUCKET_TTL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn is_unique(&self, tick: &NormalizedTick) -> AppResult<bool>;
}

struct Bucket {
    members: HashSet<String>,
    expires_at: Instant,
}

/// In-process stand-in for the external dedup store. Authoritative within
/// this process; a production deployment would point this trait at Redis
/// instead.
#[derive(Default)]
pub struct InMemoryDeduplicator {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_name(tick: &NormalizedTick) -> String {
        format!("dedup:{}", tick.timestamp.format("%Y%m%d%H%M"))
    }
}

#[async_trait]
impl Deduplicator for InMemoryDeduplicator {
    async fn is_unique(&self, tick: &NormalizedTick) -> AppResult<bool> {
        let bucket_name = Self::bucket_name(tick);
        let key = tick.dedup_key();
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        buckets.retain(|_, b| b.expires_at > now);
        let bucket = buckets.entry(bucket_name).or_insert_with(|| Bucket {
            members: HashSet::new(),
            expires_at: now + BUCKET_TTL,
        });

        Ok(bucket.members.insert(key))
    }
}

/// A deduplicator that always errors, used in tests to exercise the
/// `BackendUnavailable` path the pipeline must tolerate.
pub struct UnavailableDeduplicator;

#[async_trait]
impl Deduplicator for UnavailableDeduplicator {
    async fn is_unique(&self, _tick: &NormalizedTick) -> AppResult<bool> {
        Err(AppError::BackendUnavailable("dedup store unreachable".into()))
    }
}
