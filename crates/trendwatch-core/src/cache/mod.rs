//! Durable cache of normalized metric payloads.

mod memory;
mod warehouse;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{Entity, Geo, MetricKind, UtcDateTime};
use crate::processor::MetricPayload;
use crate::upstream::UpstreamErrorKind;
use crate::CoreError;

pub use memory::MemoryCacheStore;
pub use warehouse::WarehouseCacheStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'a>>;

/// SHA-256 hex digest of `entity:metric_kind:timeframe:geo`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(entity: &Entity, kind: MetricKind, timeframe: &str, geo: &Geo) -> Self {
        let material = format!(
            "{}:{}:{}:{}",
            entity.as_str(),
            kind.as_str(),
            timeframe,
            geo.as_str()
        );
        Self(hex::encode(Sha256::digest(material.as_bytes())))
    }

    /// Wraps a key read back from storage.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one cached slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryScope {
    pub entity: Entity,
    pub metric_kind: MetricKind,
    pub timeframe: String,
    pub geo: Geo,
}

impl EntryScope {
    pub fn new(
        entity: Entity,
        metric_kind: MetricKind,
        timeframe: impl Into<String>,
        geo: Geo,
    ) -> Self {
        Self {
            entity,
            metric_kind,
            timeframe: timeframe.into(),
            geo,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::derive(&self.entity, self.metric_kind, &self.timeframe, &self.geo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Fresh,
    Stale,
    Expired,
}

impl CacheStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
        }
    }
}

/// One cached payload with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub entity: Entity,
    pub metric_kind: MetricKind,
    pub timeframe: String,
    pub geo: Geo,
    pub payload: MetricPayload,
    pub fetched_at: UtcDateTime,
    pub expires_at: UtcDateTime,
    pub last_accessed_at: UtcDateTime,
    pub fetch_count: u64,
    pub retry_count: u32,
    pub last_error: String,
    pub last_error_kind: Option<UpstreamErrorKind>,
}

impl CacheEntry {
    pub fn ttl(&self) -> Duration {
        self.expires_at.duration_since(self.fetched_at)
    }

    /// Rate limited at least `max_retries` times in a row.
    pub fn in_cooldown(&self, max_retries: u32) -> bool {
        self.last_error_kind == Some(UpstreamErrorKind::RateLimited)
            && self.retry_count >= max_retries
    }
}

/// Derives [`CacheStatus`] from timestamps at read time.
///
/// An entry is stale during the last `stale_margin` fraction of its TTL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    stale_margin: f64,
}

impl FreshnessPolicy {
    pub fn new(stale_margin: f64) -> Self {
        Self {
            stale_margin: stale_margin.clamp(0.0, 1.0),
        }
    }

    pub fn status(&self, entry: &CacheEntry, now: UtcDateTime) -> CacheStatus {
        if now >= entry.expires_at {
            return CacheStatus::Expired;
        }
        let margin = entry.ttl().mul_f64(self.stale_margin);
        if now >= entry.expires_at.saturating_sub(margin) {
            CacheStatus::Stale
        } else {
            CacheStatus::Fresh
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// Successful fetch to fold into the store.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub scope: EntryScope,
    pub payload: MetricPayload,
    pub ttl: Duration,
    pub at: UtcDateTime,
}

/// Failed fetch to fold into an existing entry.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub key: CacheKey,
    pub kind: UpstreamErrorKind,
    pub message: String,
}

/// Creates or refreshes an entry: fresh payload, counters reset.
pub fn apply_success(current: Option<CacheEntry>, record: SuccessRecord) -> CacheEntry {
    let key = record.scope.key();
    let fetch_count = current.as_ref().map_or(0, |entry| entry.fetch_count);
    CacheEntry {
        key,
        entity: record.scope.entity,
        metric_kind: record.scope.metric_kind,
        timeframe: record.scope.timeframe,
        geo: record.scope.geo,
        payload: record.payload,
        fetched_at: record.at,
        expires_at: record.at.saturating_add(record.ttl),
        last_accessed_at: record.at,
        fetch_count: fetch_count.saturating_add(1),
        retry_count: 0,
        last_error: String::new(),
        last_error_kind: None,
    }
}

/// Bumps the retry counter of an existing entry; never creates one.
pub fn apply_failure(current: Option<CacheEntry>, record: &FailureRecord) -> Option<CacheEntry> {
    let mut entry = current?;
    entry.retry_count = entry.retry_count.saturating_add(1);
    entry.last_error = record.message.clone();
    entry.last_error_kind = Some(record.kind);
    Some(entry)
}

/// Optional filters for bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheFilter {
    pub entity: Option<Entity>,
    pub metric_kind: Option<MetricKind>,
}

impl CacheFilter {
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        self.entity.as_ref().map_or(true, |entity| *entity == entry.entity)
            && self.metric_kind.map_or(true, |kind| kind == entry.metric_kind)
    }
}

/// Persistent key/value store of [`CacheEntry`] values.
///
/// `record_success` and `record_failure` read and write inside one critical
/// section so concurrent counter updates are not lost.
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CacheEntry>>;

    fn put(&self, entry: CacheEntry) -> StoreFuture<'_, ()>;

    /// Updates `last_accessed_at`; returns whether the key existed.
    fn touch_access<'a>(&'a self, key: &'a CacheKey, at: UtcDateTime) -> StoreFuture<'a, bool>;

    fn delete(&self, filter: CacheFilter) -> StoreFuture<'_, usize>;

    fn entries(&self) -> StoreFuture<'_, Vec<CacheEntry>>;

    fn record_success(&self, record: SuccessRecord) -> StoreFuture<'_, CacheEntry>;

    /// `None` when the key has no entry.
    fn record_failure(&self, record: FailureRecord) -> StoreFuture<'_, Option<CacheEntry>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub fresh: usize,
    pub stale: usize,
    pub expired: usize,
}

impl StatusCounts {
    fn add(&mut self, status: CacheStatus) {
        match status {
            CacheStatus::Fresh => self.fresh += 1,
            CacheStatus::Stale => self.stale += 1,
            CacheStatus::Expired => self.expired += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fresh + self.stale + self.expired
    }
}

/// Freshness counts overall and per entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub total_entries: usize,
    pub overall: StatusCounts,
    pub per_entity: BTreeMap<String, StatusCounts>,
    pub in_cooldown: usize,
}

impl CacheSummary {
    pub fn from_entries(
        entries: &[CacheEntry],
        policy: FreshnessPolicy,
        max_retries: u32,
        now: UtcDateTime,
    ) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            let status = policy.status(entry, now);
            summary.overall.add(status);
            summary
                .per_entity
                .entry(entry.entity.as_str().to_owned())
                .or_default()
                .add(status);
            if entry.in_cooldown(max_retries) {
                summary.in_cooldown += 1;
            }
        }
        summary.total_entries = summary.overall.total();
        summary
    }
}
