//! Behavior tests for the DuckDB-backed cache and request log.

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;
use trendwatch_core::{
    CacheFilter, CacheStore, FetchOrchestrator, MetricKind, MetricsRequest, PayloadHandle,
    PayloadRequest, RawPayload, RequestLog, RequestStatus, ResponseStatus, TrendsSource,
    UpstreamError, UpstreamFuture, Warehouse, WarehouseCacheStore, WarehouseConfig,
    WarehouseRequestLog,
};
use trendwatch_tests::unpaced_config;

/// Answers interest-over-time and rate-limits every other kind.
struct HalfBrokenSource;

impl TrendsSource for HalfBrokenSource {
    fn name(&self) -> &'static str {
        "half_broken"
    }

    fn build_payload<'a>(&'a self, request: &'a PayloadRequest) -> UpstreamFuture<'a, PayloadHandle> {
        Box::pin(async move { Ok(PayloadHandle::new(request.clone())) })
    }

    fn fetch<'a>(&'a self, _handle: &'a PayloadHandle, kind: MetricKind) -> UpstreamFuture<'a, RawPayload> {
        Box::pin(async move {
            match kind {
                MetricKind::InterestOverTime => Ok(RawPayload::FlatList(vec![
                    json!({"value": 12}),
                    json!({"value": 30}),
                    json!({"value": 45}),
                ])),
                _ => Err(UpstreamError::rate_limited("429 Too Many Requests")),
            }
        })
    }
}

fn orchestrator(warehouse: &Warehouse, with_source: bool) -> FetchOrchestrator {
    let builder = FetchOrchestrator::builder(unpaced_config())
        .cache(Arc::new(WarehouseCacheStore::new(warehouse.clone())))
        .request_log(Arc::new(WarehouseRequestLog::new(warehouse.clone())));
    if with_source {
        builder.source(Arc::new(HalfBrokenSource)).build()
    } else {
        builder.build()
    }
}

fn request() -> MetricsRequest {
    MetricsRequest::parse(
        "yellow fever",
        &["interest_over_time", "related_queries"],
        "today 3-m",
        "",
    )
    .expect("valid request")
}

#[tokio::test]
async fn when_process_restarts_cached_payloads_are_still_served() {
    // Given: A first process that fetched into DuckDB
    let dir = tempdir().expect("tempdir");
    let first = Warehouse::open(WarehouseConfig::under(dir.path())).expect("open");
    let live = orchestrator(&first, true).get_metrics(&request()).await;
    drop(first);

    // When: A second process with no upstream opens the same warehouse
    let reopened = Warehouse::open(WarehouseConfig::under(dir.path())).expect("reopen");
    let offline = orchestrator(&reopened, false).get_metrics(&request()).await;

    // Then: The fetched kind survives and the failed kind never got an entry
    assert_eq!(live.kind_status[&MetricKind::InterestOverTime], ResponseStatus::Fresh);
    assert_eq!(live.kind_status[&MetricKind::RelatedQueries], ResponseStatus::Error);
    assert_eq!(
        offline.metric(MetricKind::InterestOverTime),
        live.metric(MetricKind::InterestOverTime)
    );
    assert_eq!(offline.kind_status[&MetricKind::RelatedQueries], ResponseStatus::NoCache);

    let entries = WarehouseCacheStore::new(reopened)
        .entries()
        .await
        .expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].metric_kind, MetricKind::InterestOverTime);
}

#[tokio::test]
async fn when_upstream_is_called_every_attempt_is_logged_newest_first() {
    let dir = tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::under(dir.path())).expect("open");
    orchestrator(&warehouse, true).get_metrics(&request()).await;

    let log = WarehouseRequestLog::new(warehouse)
        .recent(10)
        .await
        .expect("recent");

    assert_eq!(log.len(), 2);
    assert_eq!(log[0].metric_kind, MetricKind::RelatedQueries);
    assert_eq!(log[0].status, RequestStatus::RateLimited);
    assert!(log[0].error_message.as_deref().is_some_and(|message| message.contains("429")));
    assert_eq!(log[1].status, RequestStatus::Success);
    assert!(log.iter().all(|entry| !entry.cache_hit));
}

#[tokio::test]
async fn when_cache_is_cleared_by_kind_other_kinds_remain() {
    // Given: Two entities with interest data
    let dir = tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::under(dir.path())).expect("open");
    let orchestrator = orchestrator(&warehouse, true);
    for entity in ["malaria", "cholera"] {
        let request = MetricsRequest::parse(entity, &["interest_over_time"], "today 1-m", "GH")
            .expect("valid request");
        orchestrator.get_metrics(&request).await;
    }

    // When: Only related queries are cleared, then interest for malaria
    let none = orchestrator
        .clear_cache(CacheFilter {
            entity: None,
            metric_kind: Some(MetricKind::RelatedQueries),
        })
        .await
        .expect("clear");
    let summary_before = orchestrator.cache_status_summary().await.expect("summary");
    let one = orchestrator
        .clear_cache(CacheFilter {
            entity: Some("malaria".try_into().expect("entity")),
            metric_kind: Some(MetricKind::InterestOverTime),
        })
        .await
        .expect("clear");

    // Then: Deletes are scoped to their filters
    assert_eq!(none, 0);
    assert_eq!(summary_before.total_entries, 2);
    assert_eq!(summary_before.overall.fresh, 2);
    assert_eq!(one, 1);
    let summary_after = orchestrator.cache_status_summary().await.expect("summary");
    assert_eq!(summary_after.per_entity.keys().collect::<Vec<_>>(), ["cholera"]);
}
