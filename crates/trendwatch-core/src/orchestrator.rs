//! Decides per metric kind whether to serve the cache or call upstream, and
//! paces, retries and degrades the upstream calls it makes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{
    apply_success, CacheEntry, CacheFilter, CacheStatus, CacheStore, CacheSummary, EntryScope,
    FailureRecord, FreshnessPolicy, MemoryCacheStore, SuccessRecord,
};
use crate::config::TrendsConfig;
use crate::domain::{Entity, Geo, MetricKind, Timeframe, UtcDateTime};
use crate::fallback::FallbackSelector;
use crate::processor::{normalize, MetricPayload};
use crate::request_log::{MemoryRequestLog, RequestLog, RequestLogEntry};
use crate::response::{
    MetricResult, MetricsRequest, MetricsResponse, MissingMetric, ResponseStatus, WarmOutcome,
    WarmReport,
};
use crate::throttling::{duration_ms, RateLimiter};
use crate::upstream::{PayloadRequest, TrendsSource, UpstreamError};
use crate::{CoreError, ValidationError};

/// Top-level coordinator between callers, the cache and the upstream.
pub struct FetchOrchestrator {
    config: TrendsConfig,
    freshness: FreshnessPolicy,
    cache: Arc<dyn CacheStore>,
    request_log: Arc<dyn RequestLog>,
    limiter: RateLimiter,
    source: Option<Arc<dyn TrendsSource>>,
}

/// Builder for [`FetchOrchestrator`]; unset stores default to in-memory ones.
pub struct FetchOrchestratorBuilder {
    config: TrendsConfig,
    cache: Option<Arc<dyn CacheStore>>,
    request_log: Option<Arc<dyn RequestLog>>,
    limiter: Option<RateLimiter>,
    source: Option<Arc<dyn TrendsSource>>,
}

impl FetchOrchestratorBuilder {
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn request_log(mut self, request_log: Arc<dyn RequestLog>) -> Self {
        self.request_log = Some(request_log);
        self
    }

    /// Shares a limiter between orchestrators talking to the same upstream.
    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn source(mut self, source: Arc<dyn TrendsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> FetchOrchestrator {
        let limiter = self
            .limiter
            .unwrap_or_else(|| RateLimiter::from_config(&self.config));
        FetchOrchestrator {
            freshness: self.config.freshness(),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(MemoryCacheStore::new())),
            request_log: self
                .request_log
                .unwrap_or_else(|| Arc::new(MemoryRequestLog::default())),
            limiter,
            source: self.source,
            config: self.config,
        }
    }
}

/// Cached state of one requested kind.
#[derive(Debug, Clone)]
struct KindSlot {
    scope: EntryScope,
    cached: Option<CacheEntry>,
    status: Option<CacheStatus>,
}

impl KindSlot {
    fn kind(&self) -> MetricKind {
        self.scope.metric_kind
    }
}

/// Result of one live attempt for one kind.
#[derive(Debug, Clone)]
enum LiveOutcome {
    Fetched(CacheEntry),
    /// `entry` is the stored entry after the failure was counted, if any.
    Failed {
        error: UpstreamError,
        entry: Option<CacheEntry>,
    },
}

#[derive(Debug, Clone)]
struct Served {
    result: MetricResult,
    status: ResponseStatus,
    fetched_at: Option<UtcDateTime>,
}

impl Served {
    fn from_entry(entry: &CacheEntry, status: ResponseStatus) -> Self {
        Self {
            result: MetricResult::Data(entry.payload.clone()),
            status,
            fetched_at: Some(entry.fetched_at),
        }
    }

    fn from_live(outcome: &LiveOutcome) -> Self {
        match outcome {
            LiveOutcome::Fetched(entry) => Self::from_entry(entry, ResponseStatus::Fresh),
            LiveOutcome::Failed {
                entry: Some(entry), ..
            } => Self::from_entry(entry, ResponseStatus::StaleCached),
            LiveOutcome::Failed { error, entry: None } => Self {
                result: MetricResult::Missing(MissingMetric::no_cache(Some(error.to_string()))),
                status: ResponseStatus::Error,
                fetched_at: None,
            },
        }
    }
}

impl FetchOrchestrator {
    pub fn builder(config: TrendsConfig) -> FetchOrchestratorBuilder {
        FetchOrchestratorBuilder {
            config,
            cache: None,
            request_log: None,
            limiter: None,
            source: None,
        }
    }

    pub fn config(&self) -> &TrendsConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Serves every requested kind, refreshing the ones that are due.
    ///
    /// Upstream and store failures are contained per kind; every requested
    /// kind gets a slot in the response.
    pub async fn get_metrics(&self, request: &MetricsRequest) -> MetricsResponse {
        let started = Instant::now();
        let timeframe = &request.timeframe.timeframe;
        let token = timeframe.token();
        let now = UtcDateTime::now();

        let mut slots = Vec::with_capacity(request.metric_kinds.len());
        for &kind in &request.metric_kinds {
            let scope = EntryScope::new(
                request.entity.clone(),
                kind,
                token.clone(),
                request.geo.clone(),
            );
            slots.push(self.load_slot(scope, now).await);
        }

        let due = slots
            .iter()
            .filter(|slot| self.needs_live_fetch(slot, request.force_refresh))
            .cloned()
            .collect::<Vec<_>>();

        let mut served = BTreeMap::new();
        let mut fallback_used = BTreeMap::new();

        match (&self.source, due.is_empty()) {
            (_, true) => debug!(
                entity = %request.entity,
                timeframe = %token,
                "all requested kinds served from cache"
            ),
            (None, false) => debug!(
                entity = %request.entity,
                due = due.len(),
                "no upstream configured, serving cache only"
            ),
            (Some(source), false) => {
                let payload_request = PayloadRequest {
                    entity: request.entity.clone(),
                    timeframe: timeframe.clone(),
                    geo: request.geo.clone(),
                };
                let outcomes = self
                    .run_batch(source.as_ref(), &payload_request, due)
                    .await;

                let mut empty_kinds = Vec::new();
                for (kind, outcome) in &outcomes {
                    if let LiveOutcome::Fetched(entry) = outcome {
                        if entry.payload.is_structurally_empty() {
                            empty_kinds.push(*kind);
                        }
                    }
                    served.insert(*kind, Served::from_live(outcome));
                }

                let fallback = request.fallback.unwrap_or(self.config.fallback_enabled);
                if !empty_kinds.is_empty() {
                    self.retry_with_fallback(
                        source.as_ref(),
                        &payload_request,
                        &empty_kinds,
                        fallback,
                        &mut served,
                        &mut fallback_used,
                    )
                    .await;
                }
            }
        }

        for slot in &slots {
            if !served.contains_key(&slot.kind()) {
                let entry = self.serve_cached(slot, now).await;
                served.insert(slot.kind(), entry);
            }
        }

        let kind_status = served
            .iter()
            .map(|(kind, served)| (*kind, served.status))
            .collect::<BTreeMap<_, _>>();
        let cache_status = ResponseStatus::overall(kind_status.values().copied());
        let last_updated = served.values().filter_map(|served| served.fetched_at).min();
        let converted = request.timeframe.was_converted();

        info!(
            entity = %request.entity,
            timeframe = %token,
            geo = %request.geo,
            cache_status = cache_status.as_str(),
            elapsed_ms = duration_ms(started.elapsed()),
            "metrics served"
        );

        MetricsResponse {
            entity: request.entity.clone(),
            timeframe: token,
            timeframe_description: timeframe.description(),
            geo: request.geo.clone(),
            metrics: served
                .into_iter()
                .map(|(kind, served)| (kind, served.result))
                .collect(),
            cache_status,
            last_updated,
            original_timeframe: converted.then(|| request.timeframe.original.clone()),
            timeframe_converted: converted.then_some(true),
            conversion_note: request.timeframe.conversion_note.clone(),
            fallback_used,
            kind_status,
        }
    }

    /// [`Self::get_metrics`] bounded by a caller deadline.
    ///
    /// Each kind is fetched and written as one step, so an expired deadline
    /// never leaves a half-written entry behind.
    pub async fn get_metrics_with_timeout(
        &self,
        request: &MetricsRequest,
        timeout: Duration,
    ) -> Result<MetricsResponse, CoreError> {
        tokio::time::timeout(timeout, self.get_metrics(request))
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_ms: duration_ms(timeout),
            })
    }

    /// Refreshes every tracked entity concurrently; upstream access is still
    /// serialized by the shared limiter.
    pub async fn warm_cache(
        self: &Arc<Self>,
        timeframe: &str,
        geo: &Geo,
        kinds: &[MetricKind],
        force_refresh: bool,
    ) -> Result<WarmReport, ValidationError> {
        let normalized = Timeframe::normalize(timeframe)?;
        let kinds = if kinds.is_empty() {
            MetricKind::ALL.to_vec()
        } else {
            kinds.to_vec()
        };

        let mut outcomes = Vec::new();
        let mut pending = Vec::new();
        let mut tasks = JoinSet::new();
        for name in &self.config.tracked_entities {
            let request = Entity::parse(name).and_then(|entity| {
                MetricsRequest::new(entity, kinds.iter().copied(), timeframe, geo.clone())
            });
            let request = match request {
                Ok(request) => request.with_force_refresh(force_refresh),
                Err(error) => {
                    warn!(entity = %name, %error, "skipping invalid tracked entity");
                    outcomes.push(WarmOutcome {
                        entity: name.clone(),
                        cache_status: None,
                        failed_kinds: Vec::new(),
                        error: Some(error.to_string()),
                    });
                    continue;
                }
            };

            pending.push(request.entity.as_str().to_owned());
            let orchestrator = Arc::clone(self);
            tasks.spawn(async move {
                let response = orchestrator.get_metrics(&request).await;
                WarmOutcome {
                    entity: response.entity.as_str().to_owned(),
                    cache_status: Some(response.cache_status),
                    failed_kinds: response
                        .kind_status
                        .iter()
                        .filter(|(_, status)| **status >= ResponseStatus::NoCache)
                        .map(|(kind, _)| *kind)
                        .collect(),
                    error: None,
                }
            });
        }

        let mut task_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    warn!(%error, "warm task failed");
                    task_failure = Some(error.to_string());
                }
            }
        }
        for entity in pending {
            if !outcomes.iter().any(|outcome| outcome.entity == entity) {
                outcomes.push(WarmOutcome {
                    entity,
                    cache_status: None,
                    failed_kinds: Vec::new(),
                    error: task_failure.clone(),
                });
            }
        }
        outcomes.sort_by(|left, right| left.entity.cmp(&right.entity));

        let report = WarmReport {
            timeframe: normalized.timeframe.token(),
            geo: geo.clone(),
            entities: outcomes,
        };
        info!(
            entities = report.entities.len(),
            failures = report.failures(),
            timeframe = %report.timeframe,
            "cache warm finished"
        );
        Ok(report)
    }

    pub async fn clear_cache(&self, filter: CacheFilter) -> Result<usize, CoreError> {
        let removed = self.cache.delete(filter.clone()).await?;
        info!(
            entity = filter.entity.as_ref().map(Entity::as_str).unwrap_or("*"),
            metric_kind = filter.metric_kind.map(MetricKind::as_str).unwrap_or("*"),
            removed,
            "cache cleared"
        );
        Ok(removed)
    }

    pub async fn cache_status_summary(&self) -> Result<CacheSummary, CoreError> {
        let entries = self.cache.entries().await?;
        Ok(CacheSummary::from_entries(
            &entries,
            self.freshness,
            self.config.max_retries,
            UtcDateTime::now(),
        ))
    }

    pub async fn recent_requests(&self, limit: usize) -> Result<Vec<RequestLogEntry>, CoreError> {
        self.request_log.recent(limit).await
    }

    async fn load_slot(&self, scope: EntryScope, now: UtcDateTime) -> KindSlot {
        let key = scope.key();
        let cached = match self.cache.get(&key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    cache_key = %key,
                    metric_kind = %scope.metric_kind,
                    %error,
                    "cache read failed, treating as missing"
                );
                None
            }
        };
        let status = cached
            .as_ref()
            .map(|entry| self.freshness.status(entry, now));
        KindSlot {
            scope,
            cached,
            status,
        }
    }

    /// Missing entries are always due. Existing ones are due once no longer
    /// fresh, unless they have already failed `max_retries` times in a row
    /// (which covers the rate-limit cool-down). `force` skips every check.
    fn needs_live_fetch(&self, slot: &KindSlot, force: bool) -> bool {
        if force {
            return true;
        }
        let (Some(entry), Some(status)) = (&slot.cached, slot.status) else {
            return true;
        };
        if status == CacheStatus::Fresh {
            return false;
        }
        let max_retries = self.config.max_retries;
        if entry.retry_count >= max_retries {
            debug!(
                entity = %entry.entity,
                metric_kind = %entry.metric_kind,
                retry_count = entry.retry_count,
                cooldown = entry.in_cooldown(max_retries),
                "retry ceiling reached, serving cached entry"
            );
            return false;
        }
        true
    }

    async fn serve_cached(&self, slot: &KindSlot, now: UtcDateTime) -> Served {
        let Some(entry) = &slot.cached else {
            return Served {
                result: MetricResult::Missing(MissingMetric::no_cache(None)),
                status: ResponseStatus::NoCache,
                fetched_at: None,
            };
        };
        if let Err(error) = self.cache.touch_access(&entry.key, now).await {
            warn!(cache_key = %entry.key, %error, "failed to record cache access");
        }
        let status = match slot.status {
            Some(CacheStatus::Fresh) => ResponseStatus::Fresh,
            _ => ResponseStatus::StaleCached,
        };
        Served::from_entry(entry, status)
    }

    /// One paced upstream batch: a single slot wait and build call, then the
    /// kinds one after another with a pause between them.
    async fn run_batch(
        &self,
        source: &dyn TrendsSource,
        request: &PayloadRequest,
        targets: Vec<KindSlot>,
    ) -> BTreeMap<MetricKind, LiveOutcome> {
        let mut outcomes = BTreeMap::new();
        let _permit = self.limiter.wait_for_slot().await;

        self.limiter.acquire_call_budget().await;
        let build_started = Instant::now();
        let handle = match source.build_payload(request).await {
            Ok(handle) => handle,
            Err(error) => {
                warn!(
                    source = source.name(),
                    entity = %request.entity,
                    timeframe = %request.timeframe,
                    geo = %request.geo,
                    %error,
                    "payload build failed, failing the whole batch"
                );
                let elapsed = build_started.elapsed();
                let attempt = targets
                    .iter()
                    .filter_map(|slot| slot.cached.as_ref().map(|entry| entry.retry_count))
                    .max()
                    .unwrap_or(0);
                for slot in targets {
                    self.log_attempt(request, slot.kind(), elapsed, Err(&error))
                        .await;
                    let entry = self.record_failure(&slot, &error).await;
                    outcomes.insert(
                        slot.kind(),
                        LiveOutcome::Failed {
                            error: error.clone(),
                            entry,
                        },
                    );
                }
                if error.is_rate_limited() {
                    self.limiter.backoff(attempt).await;
                }
                return outcomes;
            }
        };

        for (index, slot) in targets.into_iter().enumerate() {
            if index > 0 {
                self.limiter.inter_kind_pause().await;
            }
            self.limiter.acquire_call_budget().await;

            let kind = slot.kind();
            let started = Instant::now();
            let fetched = source.fetch(&handle, kind).await;
            let elapsed = started.elapsed();

            let outcome = match fetched {
                Ok(raw) => {
                    self.log_attempt(request, kind, elapsed, Ok(())).await;
                    let payload = normalize(kind, request.entity.as_str(), &raw);
                    if let Some(annotation) = payload.error() {
                        debug!(
                            metric_kind = %kind,
                            shape = raw.shape(),
                            annotation,
                            "payload normalized with annotation"
                        );
                    }
                    LiveOutcome::Fetched(self.record_success(&slot, payload).await)
                }
                Err(error) => {
                    warn!(
                        entity = %request.entity,
                        metric_kind = %kind,
                        timeframe = %request.timeframe,
                        %error,
                        "upstream fetch failed"
                    );
                    self.log_attempt(request, kind, elapsed, Err(&error)).await;
                    let attempt = slot.cached.as_ref().map_or(0, |entry| entry.retry_count);
                    let entry = self.record_failure(&slot, &error).await;
                    if error.is_rate_limited() {
                        self.limiter.backoff(attempt).await;
                    }
                    LiveOutcome::Failed { error, entry }
                }
            };
            outcomes.insert(kind, outcome);
        }
        outcomes
    }

    /// Retries structurally empty sparse kinds with their denser alternate
    /// timeframe, one batch per alternate.
    async fn retry_with_fallback(
        &self,
        source: &dyn TrendsSource,
        primary: &PayloadRequest,
        empty_kinds: &[MetricKind],
        enabled: bool,
        served: &mut BTreeMap<MetricKind, Served>,
        fallback_used: &mut BTreeMap<MetricKind, Option<String>>,
    ) {
        let mut groups: BTreeMap<String, (Timeframe, Vec<MetricKind>)> = BTreeMap::new();
        for &kind in empty_kinds {
            let Some(alternate) = FallbackSelector::retry_timeframe(kind, &primary.timeframe) else {
                continue;
            };
            if !enabled {
                debug!(
                    entity = %primary.entity,
                    metric_kind = %kind,
                    alternate = %alternate,
                    "empty payload, fallback disabled"
                );
                continue;
            }
            groups
                .entry(alternate.token())
                .or_insert_with(|| (alternate, Vec::new()))
                .1
                .push(kind);
        }

        let now = UtcDateTime::now();
        for (token, (timeframe, kinds)) in groups {
            info!(
                entity = %primary.entity,
                timeframe = %token,
                kinds = kinds.len(),
                "retrying empty kinds with fallback timeframe"
            );
            let mut targets = Vec::with_capacity(kinds.len());
            for &kind in &kinds {
                let scope = EntryScope::new(
                    primary.entity.clone(),
                    kind,
                    token.clone(),
                    primary.geo.clone(),
                );
                targets.push(self.load_slot(scope, now).await);
            }
            let request = PayloadRequest {
                entity: primary.entity.clone(),
                timeframe,
                geo: primary.geo.clone(),
            };
            let outcomes = self.run_batch(source, &request, targets).await;

            for kind in kinds {
                let produced = match outcomes.get(&kind) {
                    Some(LiveOutcome::Fetched(entry)) if !entry.payload.is_structurally_empty() => {
                        Some(entry)
                    }
                    _ => None,
                };
                match produced {
                    Some(entry) => {
                        served.insert(kind, Served::from_entry(entry, ResponseStatus::Fresh));
                        fallback_used.insert(kind, Some(token.clone()));
                    }
                    None => {
                        fallback_used.insert(kind, None);
                    }
                }
            }
        }
    }

    async fn record_success(&self, slot: &KindSlot, payload: MetricPayload) -> CacheEntry {
        let record = SuccessRecord {
            scope: slot.scope.clone(),
            payload,
            ttl: self.config.ttl_for(slot.kind()),
            at: UtcDateTime::now(),
        };
        match self.cache.record_success(record.clone()).await {
            Ok(entry) => {
                debug!(
                    cache_key = %entry.key,
                    metric_kind = %entry.metric_kind,
                    fetch_count = entry.fetch_count,
                    "cache entry refreshed"
                );
                entry
            }
            Err(error) => {
                warn!(
                    metric_kind = %slot.kind(),
                    %error,
                    "cache write failed, serving unsaved payload"
                );
                apply_success(slot.cached.clone(), record)
            }
        }
    }

    async fn record_failure(&self, slot: &KindSlot, error: &UpstreamError) -> Option<CacheEntry> {
        let record = FailureRecord {
            key: slot.scope.key(),
            kind: error.kind(),
            message: error.to_string(),
        };
        match self.cache.record_failure(record).await {
            Ok(entry) => entry,
            Err(store_error) => {
                warn!(
                    metric_kind = %slot.kind(),
                    error = %store_error,
                    "failed to count upstream failure"
                );
                slot.cached.clone()
            }
        }
    }

    async fn log_attempt(
        &self,
        request: &PayloadRequest,
        kind: MetricKind,
        elapsed: Duration,
        outcome: Result<(), &UpstreamError>,
    ) {
        let entry = RequestLogEntry::attempt(
            &request.entity,
            kind,
            &request.timeframe.token(),
            &request.geo,
            elapsed,
            outcome,
        );
        if let Err(error) = self.request_log.append(entry).await {
            warn!(%error, "failed to append request log entry");
        }
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("cache", &self.cache.name())
            .field("source", &self.source.as_ref().map(|source| source.name()))
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
