use thiserror::Error;

/// Validation and contract errors exposed by `trendwatch-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity cannot be empty")]
    EmptyEntity,
    #[error("entity length {len} exceeds max {max}")]
    EntityTooLong { len: usize, max: usize },

    #[error("invalid geo '{value}', expected an empty string or a code such as GH or GH-AA")]
    InvalidGeo { value: String },

    #[error(
        "invalid metric kind '{value}', expected one of interest_over_time, related_queries, related_topics, interest_by_region"
    )]
    InvalidMetricKind { value: String },
    #[error("at least one metric kind must be requested")]
    EmptyMetricKinds,

    #[error("invalid timeframe '{value}': {reason}")]
    InvalidTimeframe { value: String, reason: String },

    #[error("unreadable timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid value '{value}' for {name}")]
    InvalidConfig { name: &'static str, value: String },
}

impl ValidationError {
    pub(crate) fn timeframe(value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTimeframe {
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Warehouse(#[from] trendwatch_warehouse::WarehouseError),

    #[error("stored record is invalid: {0}")]
    InvalidRecord(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
