//! Append-only audit log of upstream call attempts.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use trendwatch_warehouse::{RequestLogRecord, Warehouse};

use crate::cache::StoreFuture;
use crate::domain::{Entity, Geo, MetricKind, UtcDateTime};
use crate::throttling::duration_ms;
use crate::upstream::UpstreamError;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    RateLimited,
    Error,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "rate_limited" => Some(Self::RateLimited),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: UtcDateTime,
    pub entity: Entity,
    pub metric_kind: MetricKind,
    pub timeframe: String,
    pub geo: Geo,
    pub status: RequestStatus,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    /// Always false: only upstream attempts are logged.
    pub cache_hit: bool,
}

impl RequestLogEntry {
    pub fn attempt(
        entity: &Entity,
        metric_kind: MetricKind,
        timeframe: &str,
        geo: &Geo,
        elapsed: Duration,
        outcome: Result<(), &UpstreamError>,
    ) -> Self {
        let (status, error_message) = match outcome {
            Ok(()) => (RequestStatus::Success, None),
            Err(error) if error.is_rate_limited() => {
                (RequestStatus::RateLimited, Some(error.to_string()))
            }
            Err(error) => (RequestStatus::Error, Some(error.to_string())),
        };
        Self {
            timestamp: UtcDateTime::now(),
            entity: entity.clone(),
            metric_kind,
            timeframe: timeframe.to_owned(),
            geo: geo.clone(),
            status,
            response_time_ms: duration_ms(elapsed),
            error_message,
            cache_hit: false,
        }
    }
}

pub trait RequestLog: Send + Sync {
    fn append(&self, entry: RequestLogEntry) -> StoreFuture<'_, ()>;

    /// Newest first.
    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<RequestLogEntry>>;
}

/// Bounded in-memory log; the oldest rows fall off once full.
#[derive(Debug, Clone)]
pub struct MemoryRequestLog {
    rows: Arc<Mutex<VecDeque<RequestLogEntry>>>,
    capacity: usize,
}

impl MemoryRequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

impl Default for MemoryRequestLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl RequestLog for MemoryRequestLog {
    fn append(&self, entry: RequestLogEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut rows = self.rows.lock().await;
            if rows.len() == self.capacity {
                rows.pop_front();
            }
            rows.push_back(entry);
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<RequestLogEntry>> {
        Box::pin(async move {
            let rows = self.rows.lock().await;
            Ok(rows.iter().rev().take(limit).cloned().collect())
        })
    }
}

/// Request log persisted next to the cache in DuckDB.
#[derive(Clone)]
pub struct WarehouseRequestLog {
    warehouse: Warehouse,
}

impl WarehouseRequestLog {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl RequestLog for WarehouseRequestLog {
    fn append(&self, entry: RequestLogEntry) -> StoreFuture<'_, ()> {
        let warehouse = self.warehouse.clone();
        Box::pin(async move {
            let record = RequestLogRecord {
                timestamp: entry.timestamp.format_rfc3339(),
                entity: entry.entity.as_str().to_owned(),
                metric_kind: entry.metric_kind.as_str().to_owned(),
                timeframe: entry.timeframe,
                geo: entry.geo.as_str().to_owned(),
                status: entry.status.as_str().to_owned(),
                response_time_ms: entry.response_time_ms,
                error_message: entry.error_message,
                cache_hit: entry.cache_hit,
            };
            tokio::task::spawn_blocking(move || warehouse.append_request(&record))
                .await
                .map_err(|error| CoreError::Task(error.to_string()))??;
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<RequestLogEntry>> {
        let warehouse = self.warehouse.clone();
        Box::pin(async move {
            let records = tokio::task::spawn_blocking(move || warehouse.recent_requests(limit))
                .await
                .map_err(|error| CoreError::Task(error.to_string()))??;
            records.into_iter().map(entry_from_record).collect()
        })
    }
}

fn entry_from_record(record: RequestLogRecord) -> Result<RequestLogEntry, CoreError> {
    let status = RequestStatus::parse(&record.status).ok_or_else(|| {
        CoreError::InvalidRecord(format!("unknown request status '{}'", record.status))
    })?;
    Ok(RequestLogEntry {
        timestamp: UtcDateTime::parse(&record.timestamp)?,
        entity: Entity::parse(&record.entity)?,
        metric_kind: MetricKind::from_str(&record.metric_kind)?,
        timeframe: record.timeframe,
        geo: Geo::parse(&record.geo)?,
        status,
        response_time_ms: record.response_time_ms,
        error_message: record.error_message,
        cache_hit: record.cache_hit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entity: &str, outcome: Result<(), &UpstreamError>) -> RequestLogEntry {
        RequestLogEntry::attempt(
            &Entity::parse(entity).expect("entity"),
            MetricKind::InterestOverTime,
            "today 3-m",
            &Geo::worldwide(),
            Duration::from_millis(42),
            outcome,
        )
    }

    #[test]
    fn classifies_outcomes() {
        let limited = UpstreamError::rate_limited("429");
        let broken = UpstreamError::upstream("500");

        assert_eq!(entry("malaria", Ok(())).status, RequestStatus::Success);
        assert_eq!(entry("malaria", Err(&limited)).status, RequestStatus::RateLimited);
        let failed = entry("malaria", Err(&broken));
        assert_eq!(failed.status, RequestStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("upstream.error: 500"));
        assert!(!failed.cache_hit);
    }

    #[tokio::test]
    async fn memory_log_is_bounded_and_newest_first() {
        let log = MemoryRequestLog::new(2);
        for entity in ["malaria", "cholera", "typhoid"] {
            log.append(entry(entity, Ok(()))).await.expect("append");
        }

        let recent = log.recent(10).await.expect("recent");
        assert_eq!(log.len().await, 2);
        assert_eq!(recent[0].entity.as_str(), "typhoid");
        assert_eq!(recent[1].entity.as_str(), "cholera");
    }
}
