use std::str::FromStr;

use tracing::debug;
use trendwatch_warehouse::{CacheEntryRecord, Warehouse};

use super::{
    apply_failure, apply_success, CacheEntry, CacheFilter, CacheKey, CacheStore, FailureRecord,
    StoreFuture, SuccessRecord,
};
use crate::domain::{Entity, Geo, MetricKind, UtcDateTime};
use crate::processor::MetricPayload;
use crate::upstream::UpstreamErrorKind;
use crate::CoreError;

/// DuckDB-backed cache store; survives restarts.
#[derive(Clone)]
pub struct WarehouseCacheStore {
    warehouse: Warehouse,
}

impl WarehouseCacheStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, job: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(Warehouse) -> Result<T, CoreError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || job(warehouse))
            .await
            .map_err(|error| CoreError::Task(error.to_string()))?
    }
}

impl CacheStore for WarehouseCacheStore {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CacheEntry>> {
        let key = key.as_str().to_owned();
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .fetch_entry(&key)?
                    .map(entry_from_record)
                    .transpose()
            })
            .await
        })
    }

    fn put(&self, entry: CacheEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let record = record_from_entry(&entry)?;
            self.blocking(move |warehouse| Ok(warehouse.upsert_entry(&record)?))
                .await
        })
    }

    fn touch_access<'a>(&'a self, key: &'a CacheKey, at: UtcDateTime) -> StoreFuture<'a, bool> {
        let key = key.as_str().to_owned();
        Box::pin(async move {
            self.blocking(move |warehouse| {
                Ok(warehouse.touch_entry(&key, &at.format_rfc3339())?)
            })
            .await
        })
    }

    fn delete(&self, filter: CacheFilter) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                let entity = filter.entity.as_ref().map(Entity::as_str);
                let kind = filter.metric_kind.map(MetricKind::as_str);
                Ok(warehouse.delete_entries(entity, kind)?)
            })
            .await
        })
    }

    fn entries(&self) -> StoreFuture<'_, Vec<CacheEntry>> {
        Box::pin(async move {
            self.blocking(|warehouse| {
                warehouse
                    .list_entries()?
                    .into_iter()
                    .map(entry_from_record)
                    .collect()
            })
            .await
        })
    }

    fn record_success(&self, record: SuccessRecord) -> StoreFuture<'_, CacheEntry> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                let key = record.scope.key();
                let mut failure = None;
                let mut written = None;
                warehouse.update_entry(key.as_str(), |current| {
                    let current = match current.map(entry_from_record).transpose() {
                        Ok(current) => current,
                        // An unreadable row is replaced outright.
                        Err(error) => {
                            debug!(%error, cache_key = %key, "replacing unreadable cache row");
                            None
                        }
                    };
                    let entry = apply_success(current, record);
                    match record_from_entry(&entry) {
                        Ok(row) => {
                            written = Some(entry);
                            Some(row)
                        }
                        Err(error) => {
                            failure = Some(error);
                            None
                        }
                    }
                })?;
                if let Some(error) = failure {
                    return Err(error);
                }
                written.ok_or_else(|| CoreError::InvalidRecord(format!("entry {key} was not written")))
            })
            .await
        })
    }

    fn record_failure(&self, record: FailureRecord) -> StoreFuture<'_, Option<CacheEntry>> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                let mut failure = None;
                let mut written = None;
                warehouse.update_entry(record.key.as_str(), |current| {
                    let current = match current.map(entry_from_record).transpose() {
                        Ok(current) => current,
                        Err(error) => {
                            failure = Some(error);
                            return None;
                        }
                    };
                    let entry = apply_failure(current, &record)?;
                    match record_from_entry(&entry) {
                        Ok(row) => {
                            written = Some(entry);
                            Some(row)
                        }
                        Err(error) => {
                            failure = Some(error);
                            None
                        }
                    }
                })?;
                match failure {
                    Some(error) => Err(error),
                    None => Ok(written),
                }
            })
            .await
        })
    }
}

fn record_from_entry(entry: &CacheEntry) -> Result<CacheEntryRecord, CoreError> {
    Ok(CacheEntryRecord {
        key: entry.key.as_str().to_owned(),
        entity: entry.entity.as_str().to_owned(),
        metric_kind: entry.metric_kind.as_str().to_owned(),
        timeframe: entry.timeframe.clone(),
        geo: entry.geo.as_str().to_owned(),
        payload: entry.payload.to_json()?,
        fetched_at: entry.fetched_at.format_rfc3339(),
        expires_at: entry.expires_at.format_rfc3339(),
        last_accessed_at: entry.last_accessed_at.format_rfc3339(),
        fetch_count: entry.fetch_count,
        retry_count: entry.retry_count,
        last_error: entry.last_error.clone(),
        last_error_kind: entry.last_error_kind.map(|kind| kind.as_str().to_owned()),
    })
}

fn entry_from_record(record: CacheEntryRecord) -> Result<CacheEntry, CoreError> {
    let metric_kind = MetricKind::from_str(&record.metric_kind)?;
    let last_error_kind = match record.last_error_kind.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(UpstreamErrorKind::parse(raw).ok_or_else(|| {
            CoreError::InvalidRecord(format!("unknown error kind '{raw}' for {}", record.key))
        })?),
    };

    Ok(CacheEntry {
        key: CacheKey::from_stored(record.key),
        entity: Entity::parse(&record.entity)?,
        metric_kind,
        timeframe: record.timeframe,
        geo: Geo::parse(&record.geo)?,
        payload: MetricPayload::from_json(metric_kind, &record.payload)?,
        fetched_at: UtcDateTime::parse(&record.fetched_at)?,
        expires_at: UtcDateTime::parse(&record.expires_at)?,
        last_accessed_at: UtcDateTime::parse(&record.last_accessed_at)?,
        fetch_count: record.fetch_count,
        retry_count: record.retry_count,
        last_error: record.last_error,
        last_error_kind,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;
    use trendwatch_warehouse::WarehouseConfig;

    use super::*;
    use crate::cache::tests::success;

    #[tokio::test]
    async fn success_then_failure_persists_counters() {
        let dir = tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::under(dir.path())).expect("open");
        let store = WarehouseCacheStore::new(warehouse);
        let now = UtcDateTime::now();

        let entry = store
            .record_success(success("malaria", MetricKind::RelatedQueries, now))
            .await
            .expect("success");
        let failed = store
            .record_failure(FailureRecord {
                key: entry.key.clone(),
                kind: UpstreamErrorKind::RateLimited,
                message: String::from("429 Too Many Requests"),
            })
            .await
            .expect("failure")
            .expect("entry exists");

        let reloaded = store.get(&entry.key).await.expect("get").expect("row");
        assert_eq!(reloaded, failed);
        assert_eq!(reloaded.retry_count, 1);
        assert_eq!(reloaded.fetch_count, 1);
        assert_eq!(reloaded.ttl(), Duration::from_secs(1_000));
    }
}
