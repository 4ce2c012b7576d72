//! # Trendwatch Core
//!
//! Caching, rate limiting and fetch orchestration for search-interest
//! metrics of tracked diseases.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Upstream adapters (Google Trends) |
//! | [`backoff`] | Exponential backoff policy |
//! | [`cache`] | Cache entries, freshness and the in-memory/DuckDB stores |
//! | [`config`] | Runtime configuration and environment overrides |
//! | [`domain`] | Entities, geos, metric kinds, timeframes, timestamps |
//! | [`fallback`] | Alternate timeframes for sparse metric kinds |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`orchestrator`] | Cache-or-fetch coordinator |
//! | [`processor`] | Raw payload shapes and their normalization |
//! | [`request_log`] | Audit log of upstream call attempts |
//! | [`response`] | Request and response types |
//! | [`throttling`] | Upstream slot, pacing and call quota |
//! | [`upstream`] | Upstream source trait and error taxonomy |
//!
//! ## Flow
//!
//! ```text
//! caller ──▶ FetchOrchestrator ──▶ CacheStore (fresh? serve)
//!                   │
//!                   ▼ due kinds
//!             RateLimiter ──▶ TrendsSource ──▶ DataProcessor ──▶ CacheStore
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trendwatch_core::{FetchOrchestrator, GoogleTrendsAdapter, MetricsRequest, TrendsConfig};
//!
//! let config = TrendsConfig::from_env()?;
//! let orchestrator = FetchOrchestrator::builder(config.clone())
//!     .source(Arc::new(GoogleTrendsAdapter::new(&config)))
//!     .build();
//! let request = MetricsRequest::parse("malaria", &["interest_over_time"], "today 3-m", "GH")?;
//! let response = orchestrator.get_metrics(&request).await;
//! ```

pub mod adapters;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fallback;
pub mod http_client;
pub mod orchestrator;
pub mod processor;
pub mod request_log;
pub mod response;
pub mod throttling;
pub mod upstream;

pub use adapters::GoogleTrendsAdapter;
pub use backoff::BackoffPolicy;
pub use cache::{
    CacheEntry, CacheFilter, CacheKey, CacheStatus, CacheStore, CacheSummary, EntryScope,
    FreshnessPolicy, MemoryCacheStore, StatusCounts, WarehouseCacheStore,
};
pub use config::{TrendsConfig, DEFAULT_TRACKED_ENTITIES};
pub use domain::{
    Entity, Geo, MetricKind, NormalizedTimeframe, Timeframe, TimeframePreset, UtcDateTime,
};
pub use error::{CoreError, ValidationError};
pub use fallback::FallbackSelector;
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use orchestrator::{FetchOrchestrator, FetchOrchestratorBuilder};
pub use processor::{normalize, MetricPayload, RawPayload, RelatedBlock, Table};
pub use request_log::{
    MemoryRequestLog, RequestLog, RequestLogEntry, RequestStatus, WarehouseRequestLog,
};
pub use response::{
    MetricResult, MetricsRequest, MetricsResponse, MissingMetric, ResponseStatus, WarmOutcome,
    WarmReport, NO_CACHED_DATA,
};
pub use throttling::{LimiterStats, RateLimiter, SlotPermit};
pub use upstream::{
    PayloadHandle, PayloadRequest, TrendsSource, UpstreamError, UpstreamErrorKind, UpstreamFuture,
};

pub use trendwatch_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
