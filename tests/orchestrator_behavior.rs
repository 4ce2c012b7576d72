//! Behavior tests for the fetch orchestrator.
//!
//! The upstream is a scripted `TrendsSource`; the tokio clock is paused so
//! pacing and backoff sleeps complete instantly while still being counted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use trendwatch_core::cache::{apply_success, SuccessRecord};
use trendwatch_core::{
    normalize, CacheEntry, CacheFilter, CacheStore, CoreError, Entity, EntryScope,
    FetchOrchestrator, Geo, MemoryCacheStore, MetricKind, MetricResult, MetricsRequest,
    PayloadHandle, PayloadRequest, RawPayload, RequestStatus, ResponseStatus, Table,
    TrendsConfig, TrendsSource, UpstreamError, UpstreamErrorKind, UpstreamFuture, UtcDateTime,
    NO_CACHED_DATA,
};

// =============================================================================
// Fixtures
// =============================================================================

type Script = HashMap<(String, MetricKind), Result<RawPayload, UpstreamError>>;

/// Upstream that answers from a script keyed by timeframe token and kind.
/// Unscripted kinds come back empty.
#[derive(Default)]
struct ScriptedSource {
    script: Mutex<Script>,
    build_error: Mutex<Option<UpstreamError>>,
    fetch_delay: Mutex<Option<Duration>>,
    builds: Mutex<Vec<String>>,
    fetches: Mutex<Vec<(String, MetricKind)>>,
}

impl ScriptedSource {
    fn respond(&self, timeframe: &str, kind: MetricKind, result: Result<RawPayload, UpstreamError>) {
        self.script
            .lock()
            .unwrap()
            .insert((timeframe.to_owned(), kind), result);
    }

    fn fail_builds(&self, error: UpstreamError) {
        *self.build_error.lock().unwrap() = Some(error);
    }

    fn slow_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    fn fetches(&self) -> Vec<(String, MetricKind)> {
        self.fetches.lock().unwrap().clone()
    }
}

impl TrendsSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn build_payload<'a>(&'a self, request: &'a PayloadRequest) -> UpstreamFuture<'a, PayloadHandle> {
        Box::pin(async move {
            self.builds.lock().unwrap().push(request.timeframe.token());
            if let Some(error) = self.build_error.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(PayloadHandle::new(request.clone()))
        })
    }

    fn fetch<'a>(&'a self, handle: &'a PayloadHandle, kind: MetricKind) -> UpstreamFuture<'a, RawPayload> {
        Box::pin(async move {
            let token = handle.request.timeframe.token();
            self.fetches.lock().unwrap().push((token.clone(), kind));
            let delay = *self.fetch_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .get(&(token, kind))
                .cloned()
                .unwrap_or(Ok(RawPayload::Empty))
        })
    }
}

fn config() -> TrendsConfig {
    TrendsConfig {
        base_delay: Duration::from_secs(5),
        inter_kind_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        max_retries: 3,
        cache_ttl: Duration::from_secs(1_000),
        quota_limit: 1_000,
        tracked_entities: vec![String::from("malaria"), String::from("cholera")],
        ..TrendsConfig::default()
    }
}

struct Harness {
    orchestrator: Arc<FetchOrchestrator>,
    source: Arc<ScriptedSource>,
    cache: Arc<MemoryCacheStore>,
}

fn harness() -> Harness {
    let source = Arc::new(ScriptedSource::default());
    let cache = Arc::new(MemoryCacheStore::new());
    let orchestrator = FetchOrchestrator::builder(config())
        .cache(cache.clone())
        .source(source.clone())
        .build();
    Harness {
        orchestrator: Arc::new(orchestrator),
        source,
        cache,
    }
}

fn series(entity: &str, points: &[u32]) -> RawPayload {
    RawPayload::Table(Table::new(
        vec![String::from("date"), entity.to_owned()],
        points
            .iter()
            .enumerate()
            .map(|(index, point)| vec![json!(format!("2024-01-{:02}", index + 1)), json!(point)])
            .collect(),
    ))
}

fn queries(labels: &[&str]) -> RawPayload {
    RawPayload::FlatList(
        labels
            .iter()
            .map(|label| json!({"query": label, "value": 100}))
            .collect(),
    )
}

fn request(entity: &str, kinds: &[&str], timeframe: &str) -> MetricsRequest {
    MetricsRequest::parse(entity, kinds, timeframe, "GH").expect("valid request")
}

/// Entry fetched `age` ago with the configured TTL.
fn seeded_entry(entity: &str, kind: MetricKind, timeframe: &str, age: Duration) -> CacheEntry {
    let at = UtcDateTime::now().saturating_sub(age);
    apply_success(
        None,
        SuccessRecord {
            scope: EntryScope::new(
                Entity::parse(entity).expect("entity"),
                kind,
                timeframe,
                Geo::parse("GH").expect("geo"),
            ),
            payload: normalize(kind, entity, &series(entity, &[10, 20, 30])),
            ttl: Duration::from_secs(1_000),
            at,
        },
    )
}

// =============================================================================
// Batch pacing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn three_missing_kinds_cost_one_slot_wait_and_two_pauses() {
    // Given: An empty cache and an upstream that answers every kind
    let h = harness();
    h.source.respond("today 3-m", MetricKind::InterestOverTime, Ok(series("malaria", &[10, 40, 80])));
    h.source.respond("today 3-m", MetricKind::RelatedQueries, Ok(queries(&["malaria symptoms"])));
    h.source.respond("today 3-m", MetricKind::RelatedTopics, Ok(queries(&["Malaria"])));

    // When: Three kinds are requested at once
    let started = tokio::time::Instant::now();
    let response = h
        .orchestrator
        .get_metrics(&request(
            "malaria",
            &["interest_over_time", "related_queries", "related_topics"],
            "today 3-m",
        ))
        .await;
    let elapsed = started.elapsed();

    // Then: One build call, one slot wait and n-1 inter-kind pauses were paid
    let stats = h.orchestrator.limiter().stats();
    assert_eq!(h.source.build_count(), 1);
    assert_eq!(h.source.fetches().len(), 3);
    assert_eq!(stats.slots_granted, 1);
    assert_eq!(stats.inter_kind_pauses, 2);
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");

    assert_eq!(response.cache_status, ResponseStatus::Fresh);
    assert_eq!(h.cache.len().await, 3);
    let log = h.orchestrator.recent_requests(10).await.expect("log");
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|entry| entry.status == RequestStatus::Success && !entry.cache_hit));
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_are_served_without_upstream_calls() {
    // Given: A first call that filled the cache
    let h = harness();
    h.source.respond("today 3-m", MetricKind::InterestOverTime, Ok(series("malaria", &[5, 5, 5])));
    let request = request("malaria", &["interest_over_time"], "today 3-m");
    let first = h.orchestrator.get_metrics(&request).await;

    // When: The same request is repeated
    let second = h.orchestrator.get_metrics(&request).await;

    // Then: The second answer comes from cache alone
    assert_eq!(h.source.build_count(), 1);
    assert_eq!(h.orchestrator.limiter().stats().slots_granted, 1);
    assert_eq!(second.cache_status, ResponseStatus::Fresh);
    assert_eq!(
        second.metric(MetricKind::InterestOverTime),
        first.metric(MetricKind::InterestOverTime)
    );

    let entries = h.cache.entries().await.expect("entries");
    assert_eq!(entries[0].fetch_count, 1);
}

// =============================================================================
// Degradation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn rate_limited_refresh_degrades_to_expired_cache() {
    // Given: An expired entry and an upstream that rate-limits
    let h = harness();
    let seeded = seeded_entry("malaria", MetricKind::InterestOverTime, "today 3-m", Duration::from_secs(2_000));
    h.cache.put(seeded.clone()).await.expect("seed");
    h.source.respond(
        "today 3-m",
        MetricKind::InterestOverTime,
        Err(UpstreamError::rate_limited("429 Too Many Requests")),
    );

    // When: The kind is requested
    let response = h
        .orchestrator
        .get_metrics(&request("malaria", &["interest_over_time"], "today 3-m"))
        .await;

    // Then: The old payload is served as stale and the failure is counted
    assert_eq!(response.cache_status, ResponseStatus::StaleCached);
    assert_eq!(
        response.metric(MetricKind::InterestOverTime),
        Some(&MetricResult::Data(seeded.payload.clone()))
    );
    assert_eq!(response.last_updated, Some(seeded.fetched_at));

    let stored = h.cache.get(&seeded.key).await.expect("get").expect("entry");
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.fetch_count, 1);
    assert_eq!(stored.last_error_kind, Some(UpstreamErrorKind::RateLimited));
    assert_eq!(stored.payload, seeded.payload);

    assert_eq!(h.orchestrator.limiter().stats().backoff_sleeps, 1);
    let log = h.orchestrator.recent_requests(1).await.expect("log");
    assert_eq!(log[0].status, RequestStatus::RateLimited);
}

#[tokio::test(start_paused = true)]
async fn failure_without_cache_reports_error_and_creates_no_entry() {
    // Given: An empty cache and an unreachable upstream
    let h = harness();
    h.source.respond(
        "today 3-m",
        MetricKind::InterestByRegion,
        Err(UpstreamError::unavailable("connection refused")),
    );

    // When: The kind is requested
    let response = h
        .orchestrator
        .get_metrics(&request("cholera", &["interest_by_region"], "today 3-m"))
        .await;

    // Then: The slot carries the no-cache error and nothing was stored
    assert_eq!(response.cache_status, ResponseStatus::Error);
    match response.metric(MetricKind::InterestByRegion) {
        Some(MetricResult::Missing(missing)) => {
            assert_eq!(missing.error, NO_CACHED_DATA);
            assert!(missing.detail.as_deref().is_some_and(|detail| detail.contains("unavailable")));
        }
        other => panic!("expected missing metric, got {other:?}"),
    }
    assert!(h.cache.is_empty().await);
    assert_eq!(h.orchestrator.limiter().stats().backoff_sleeps, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_build_fails_every_kind_and_backs_off_once() {
    // Given: One cached kind, one missing kind, and a build call that is rate limited
    let h = harness();
    let seeded = seeded_entry("typhoid", MetricKind::RelatedTopics, "today 3-m", Duration::from_secs(2_000));
    h.cache.put(seeded.clone()).await.expect("seed");
    h.source.fail_builds(UpstreamError::rate_limited("429"));

    // When: Both kinds are requested
    let response = h
        .orchestrator
        .get_metrics(&request("typhoid", &["related_topics", "related_queries"], "today 3-m"))
        .await;

    // Then: No kind was fetched, each attempt was logged, one backoff was paid
    assert!(h.source.fetches().is_empty());
    assert_eq!(response.kind_status[&MetricKind::RelatedTopics], ResponseStatus::StaleCached);
    assert_eq!(response.kind_status[&MetricKind::RelatedQueries], ResponseStatus::Error);
    assert_eq!(response.cache_status, ResponseStatus::Error);
    assert_eq!(h.orchestrator.limiter().stats().backoff_sleeps, 1);
    assert_eq!(h.orchestrator.recent_requests(10).await.expect("log").len(), 2);
    assert_eq!(h.cache.len().await, 1);
}

// =============================================================================
// Retry ceiling and cool-down
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cooling_down_entry_is_not_retried_unless_forced() {
    // Given: An expired entry rate limited max_retries times in a row
    let h = harness();
    let mut seeded = seeded_entry("measles", MetricKind::InterestOverTime, "today 3-m", Duration::from_secs(2_000));
    seeded.retry_count = 3;
    seeded.last_error = String::from("upstream.rate_limited: 429");
    seeded.last_error_kind = Some(UpstreamErrorKind::RateLimited);
    h.cache.put(seeded.clone()).await.expect("seed");
    h.source.respond("today 3-m", MetricKind::InterestOverTime, Ok(series("measles", &[1, 2, 3])));
    let request = request("measles", &["interest_over_time"], "today 3-m");

    // When: It is requested normally
    let cooled = h.orchestrator.get_metrics(&request).await;

    // Then: The cached payload is served without touching upstream
    assert_eq!(h.source.build_count(), 0);
    assert_eq!(cooled.cache_status, ResponseStatus::StaleCached);

    // When: It is requested with force refresh
    let forced = h
        .orchestrator
        .get_metrics(&request.clone().with_force_refresh(true))
        .await;

    // Then: Upstream is called and the retry state resets
    assert_eq!(h.source.build_count(), 1);
    assert_eq!(forced.cache_status, ResponseStatus::Fresh);
    let stored = h.cache.get(&seeded.key).await.expect("get").expect("entry");
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.last_error_kind, None);
    assert_eq!(stored.fetch_count, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_below_ceiling_is_refreshed() {
    // Given: An entry inside its stale margin (fetched 950s ago, TTL 1000s)
    let h = harness();
    let seeded = seeded_entry("malaria", MetricKind::InterestOverTime, "today 3-m", Duration::from_secs(950));
    h.cache.put(seeded).await.expect("seed");
    h.source.respond("today 3-m", MetricKind::InterestOverTime, Ok(series("malaria", &[9, 9, 9])));

    // When: The kind is requested
    let response = h
        .orchestrator
        .get_metrics(&request("malaria", &["interest_over_time"], "today 3-m"))
        .await;

    // Then: It is refreshed live
    assert_eq!(h.source.build_count(), 1);
    assert_eq!(response.cache_status, ResponseStatus::Fresh);
}

// =============================================================================
// Fallback timeframes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn empty_related_data_is_retried_with_fallback_timeframe() {
    // Given: Empty related queries for 12 months, data for 3 months, and
    // regional data empty for both 12 and 6 months
    let h = harness();
    h.source.respond("today 12-m", MetricKind::RelatedQueries, Ok(RawPayload::Empty));
    h.source.respond("today 3-m", MetricKind::RelatedQueries, Ok(queries(&["cholera outbreak"])));

    // When: The caller opts into fallback
    let response = h
        .orchestrator
        .get_metrics(
            &request("cholera", &["related_queries", "interest_by_region"], "today 12-m")
                .with_fallback(true),
        )
        .await;

    // Then: The retry that produced data is reported with its timeframe,
    // the one that stayed empty with null
    assert_eq!(
        response.fallback_used.get(&MetricKind::RelatedQueries),
        Some(&Some(String::from("today 3-m")))
    );
    assert_eq!(response.fallback_used.get(&MetricKind::InterestByRegion), Some(&None));
    let payload = response
        .metric(MetricKind::RelatedQueries)
        .and_then(MetricResult::payload)
        .expect("payload");
    assert!(!payload.is_structurally_empty());

    // One primary batch plus one batch per alternate timeframe
    assert_eq!(h.orchestrator.limiter().stats().slots_granted, 3);
    let json = response.to_json().expect("json");
    assert_eq!(json["fallback_used"]["related_queries"], json!("today 3-m"));
    assert!(json["fallback_used"]["interest_by_region"].is_null());
}

#[tokio::test(start_paused = true)]
async fn empty_data_without_fallback_opt_in_is_served_as_is() {
    let h = harness();

    let response = h
        .orchestrator
        .get_metrics(&request("cholera", &["related_topics"], "today 12-m"))
        .await;

    assert!(response.fallback_used.is_empty());
    assert_eq!(h.source.build_count(), 1);
    let payload = response
        .metric(MetricKind::RelatedTopics)
        .and_then(MetricResult::payload)
        .expect("payload");
    assert!(payload.is_structurally_empty());
}

// =============================================================================
// Timeframes, offline mode, deadlines, admin
// =============================================================================

#[tokio::test(start_paused = true)]
async fn converted_timeframe_is_reported() {
    let h = harness();

    let response = h
        .orchestrator
        .get_metrics(&request("malaria", &["interest_over_time"], "now 30-d"))
        .await;

    assert_eq!(response.timeframe, "today 1-m");
    assert_eq!(response.original_timeframe.as_deref(), Some("now 30-d"));
    assert_eq!(response.timeframe_converted, Some(true));
    assert!(response.conversion_note.is_some());
    assert_eq!(h.source.builds.lock().unwrap().as_slice(), ["today 1-m"]);
}

#[tokio::test(start_paused = true)]
async fn without_upstream_missing_kinds_report_no_cache() {
    // Given: An orchestrator with no upstream and one cached kind
    let cache = Arc::new(MemoryCacheStore::new());
    let seeded = seeded_entry("malaria", MetricKind::InterestOverTime, "today 3-m", Duration::from_secs(10));
    cache.put(seeded).await.expect("seed");
    let orchestrator = FetchOrchestrator::builder(config()).cache(cache).build();

    // When: A cached and an uncached kind are requested
    let response = orchestrator
        .get_metrics(&request("malaria", &["interest_over_time", "related_topics"], "today 3-m"))
        .await;

    // Then: The cached one is fresh, the other has no cache
    assert_eq!(response.kind_status[&MetricKind::InterestOverTime], ResponseStatus::Fresh);
    assert_eq!(response.kind_status[&MetricKind::RelatedTopics], ResponseStatus::NoCache);
    assert_eq!(response.cache_status, ResponseStatus::NoCache);
    assert_eq!(orchestrator.limiter().stats().slots_granted, 0);
}

#[tokio::test(start_paused = true)]
async fn caller_deadline_interrupts_without_partial_entries() {
    // Given: An upstream slower than the caller's deadline
    let h = harness();
    h.source.slow_fetches(Duration::from_secs(30));

    // When: The request is bounded to 6 seconds
    let result = h
        .orchestrator
        .get_metrics_with_timeout(
            &request("malaria", &["interest_over_time"], "today 3-m"),
            Duration::from_secs(6),
        )
        .await;

    // Then: The call times out and nothing was cached
    assert!(matches!(result, Err(CoreError::Timeout { timeout_ms: 6_000 })));
    assert!(h.cache.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn warm_cache_refreshes_every_tracked_entity_through_one_limiter() {
    let h = harness();

    let report = h
        .orchestrator
        .warm_cache("today 3-m", &Geo::parse("GH").expect("geo"), &[MetricKind::InterestOverTime], false)
        .await
        .expect("valid timeframe");

    let entities = report
        .entities
        .iter()
        .map(|outcome| outcome.entity.as_str())
        .collect::<Vec<_>>();
    assert_eq!(entities, ["cholera", "malaria"]);
    assert_eq!(report.failures(), 0);
    assert_eq!(h.orchestrator.limiter().stats().slots_granted, 2);
    assert_eq!(h.cache.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn clear_and_summarize_cache() {
    let h = harness();
    for (entity, kind, age) in [
        ("malaria", MetricKind::InterestOverTime, 10),
        ("malaria", MetricKind::RelatedTopics, 2_000),
        ("cholera", MetricKind::InterestOverTime, 950),
    ] {
        h.cache
            .put(seeded_entry(entity, kind, "today 3-m", Duration::from_secs(age)))
            .await
            .expect("seed");
    }

    let summary = h.orchestrator.cache_status_summary().await.expect("summary");
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.overall.fresh, 1);
    assert_eq!(summary.overall.stale, 1);
    assert_eq!(summary.overall.expired, 1);
    assert_eq!(summary.per_entity["malaria"].total(), 2);

    let removed = h
        .orchestrator
        .clear_cache(CacheFilter {
            entity: Some(Entity::parse("malaria").expect("entity")),
            metric_kind: None,
        })
        .await
        .expect("clear");
    assert_eq!(removed, 2);
    assert_eq!(h.cache.len().await, 1);
}
