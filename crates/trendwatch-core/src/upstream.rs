//! Contract between the orchestrator and a search-interest upstream.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Entity, Geo, MetricKind, Timeframe};
use crate::processor::RawPayload;

pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UpstreamError>> + Send + 'a>>;

/// Failure classes reported by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// Client not configured or unreachable.
    Unavailable,
    RateLimited,
    /// Body could not be parsed at all.
    Malformed,
    /// Any other upstream-side failure.
    Upstream,
}

impl UpstreamErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::Upstream => "upstream",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unavailable" => Some(Self::Unavailable),
            "rate_limited" => Some(Self::RateLimited),
            "malformed" => Some(Self::Malformed),
            "upstream" => Some(Self::Upstream),
            _ => None,
        }
    }
}

impl Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured upstream failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    kind: UpstreamErrorKind,
    message: String,
}

impl UpstreamError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Unavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Malformed, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Upstream, message)
    }

    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> UpstreamErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_rate_limited(&self) -> bool {
        matches!(self.kind, UpstreamErrorKind::RateLimited)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            UpstreamErrorKind::Unavailable => "upstream.unavailable",
            UpstreamErrorKind::RateLimited => "upstream.rate_limited",
            UpstreamErrorKind::Malformed => "upstream.malformed",
            UpstreamErrorKind::Upstream => "upstream.error",
        }
    }
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Scope of one `build_payload` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRequest {
    pub entity: Entity,
    pub timeframe: Timeframe,
    pub geo: Geo,
}

/// Opaque state produced by `build_payload` and consumed by `fetch`.
///
/// Adapters stash whatever they need (widget tokens, request bodies) in
/// `widgets`, keyed by metric kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadHandle {
    pub request: PayloadRequest,
    pub widgets: BTreeMap<MetricKind, Value>,
}

impl PayloadHandle {
    pub fn new(request: PayloadRequest) -> Self {
        Self {
            request,
            widgets: BTreeMap::new(),
        }
    }
}

/// Upstream able to deliver raw search-interest payloads.
pub trait TrendsSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepares a query scoped to one entity, timeframe and geo.
    fn build_payload<'a>(&'a self, request: &'a PayloadRequest) -> UpstreamFuture<'a, PayloadHandle>;

    /// Fetches one metric kind for a prepared query.
    fn fetch<'a>(
        &'a self,
        handle: &'a PayloadHandle,
        kind: MetricKind,
    ) -> UpstreamFuture<'a, RawPayload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(UpstreamError::rate_limited("429").code(), "upstream.rate_limited");
        assert_eq!(UpstreamError::malformed("x").code(), "upstream.malformed");
        assert_eq!(
            UpstreamError::unavailable("offline").to_string(),
            "upstream.unavailable: offline"
        );
    }

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            UpstreamErrorKind::Unavailable,
            UpstreamErrorKind::RateLimited,
            UpstreamErrorKind::Malformed,
            UpstreamErrorKind::Upstream,
        ] {
            assert_eq!(UpstreamErrorKind::parse(kind.as_str()), Some(kind));
        }
    }
}
