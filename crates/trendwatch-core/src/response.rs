use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;

use crate::domain::{Entity, Geo, MetricKind, NormalizedTimeframe, Timeframe, UtcDateTime};
use crate::processor::MetricPayload;
use crate::ValidationError;

/// Message carried by a metric slot that has neither live nor cached data.
pub const NO_CACHED_DATA: &str = "No cached data available";

/// Validated input of [`crate::FetchOrchestrator::get_metrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsRequest {
    pub entity: Entity,
    /// Deduplicated, in caller order.
    pub metric_kinds: Vec<MetricKind>,
    pub timeframe: NormalizedTimeframe,
    pub geo: Geo,
    /// `None` follows the configured default.
    pub fallback: Option<bool>,
    pub force_refresh: bool,
}

impl MetricsRequest {
    pub fn new(
        entity: Entity,
        metric_kinds: impl IntoIterator<Item = MetricKind>,
        timeframe: &str,
        geo: Geo,
    ) -> Result<Self, ValidationError> {
        let mut kinds = Vec::new();
        for kind in metric_kinds {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            return Err(ValidationError::EmptyMetricKinds);
        }

        Ok(Self {
            entity,
            metric_kinds: kinds,
            timeframe: Timeframe::normalize(timeframe)?,
            geo,
            fallback: None,
            force_refresh: false,
        })
    }

    /// Builds a request from untyped caller input.
    pub fn parse<S: AsRef<str>>(
        entity: &str,
        metric_kinds: &[S],
        timeframe: &str,
        geo: &str,
    ) -> Result<Self, ValidationError> {
        let kinds = metric_kinds
            .iter()
            .map(|kind| MetricKind::from_str(kind.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(Entity::parse(entity)?, kinds, timeframe, Geo::parse(geo)?)
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// Serving state of one metric slot, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Fresh,
    StaleCached,
    /// Nothing cached and no upstream configured.
    NoCache,
    Error,
}

impl ResponseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::StaleCached => "stale_cached",
            Self::NoCache => "no_cache",
            Self::Error => "error",
        }
    }

    /// Worst status of the set; `Error` when empty.
    pub fn overall(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses.into_iter().max().unwrap_or(Self::Error)
    }
}

/// Placeholder for a metric kind that could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingMetric {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MissingMetric {
    pub fn no_cache(detail: Option<String>) -> Self {
        Self {
            error: NO_CACHED_DATA.to_owned(),
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricResult {
    Data(MetricPayload),
    Missing(MissingMetric),
}

impl MetricResult {
    pub fn payload(&self) -> Option<&MetricPayload> {
        match self {
            Self::Data(payload) => Some(payload),
            Self::Missing(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}

/// Per-entity answer: one slot for every requested metric kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsResponse {
    pub entity: Entity,
    pub timeframe: String,
    pub timeframe_description: String,
    pub geo: Geo,
    #[serde(flatten)]
    pub metrics: BTreeMap<MetricKind, MetricResult>,
    pub cache_status: ResponseStatus,
    /// Oldest `fetched_at` among the payloads served.
    pub last_updated: Option<UtcDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe_converted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_note: Option<String>,
    /// Alternate timeframe that produced data, or `None` when the retry came
    /// back empty. Only kinds that were retried appear.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fallback_used: BTreeMap<MetricKind, Option<String>>,
    pub kind_status: BTreeMap<MetricKind, ResponseStatus>,
}

impl MetricsResponse {
    pub fn metric(&self, kind: MetricKind) -> Option<&MetricResult> {
        self.metrics.get(&kind)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Outcome of warming one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmOutcome {
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_kinds: Vec<MetricKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub timeframe: String,
    pub geo: Geo,
    pub entities: Vec<WarmOutcome>,
}

impl WarmReport {
    pub fn failures(&self) -> usize {
        self.entities
            .iter()
            .filter(|outcome| outcome.error.is_some() || !outcome.failed_kinds.is_empty())
            .count()
    }
}
