use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Metric families the upstream can deliver for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    InterestOverTime,
    RelatedQueries,
    RelatedTopics,
    InterestByRegion,
}

impl MetricKind {
    pub const ALL: [Self; 4] = [
        Self::InterestOverTime,
        Self::RelatedQueries,
        Self::RelatedTopics,
        Self::InterestByRegion,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InterestOverTime => "interest_over_time",
            Self::RelatedQueries => "related_queries",
            Self::RelatedTopics => "related_topics",
            Self::InterestByRegion => "interest_by_region",
        }
    }

    /// Kinds whose data is sparse at short timeframes and change slowly.
    pub const fn is_sparse(self) -> bool {
        !matches!(self, Self::InterestOverTime)
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "interest_over_time" => Ok(Self::InterestOverTime),
            "related_queries" => Ok(Self::RelatedQueries),
            "related_topics" => Ok(Self::RelatedTopics),
            "interest_by_region" => Ok(Self::InterestByRegion),
            _ => Err(ValidationError::InvalidMetricKind {
                value: value.to_owned(),
            }),
        }
    }
}
