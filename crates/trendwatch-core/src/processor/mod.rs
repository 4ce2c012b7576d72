//! Raw upstream payload shapes and their normalization into canonical records.
//!
//! Normalization never fails. Shapes that cannot be interpreted produce an
//! empty record carrying an `error` annotation.

mod interest;
mod regions;
mod related;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MetricKind;

pub use interest::{InterestSummary, TrendDirection};
pub use regions::{resolve_region, RegionInterest, RegionalInterest};
pub use related::{RelatedQueries, RelatedQuery, RelatedTopic, RelatedTopics};

/// Column-oriented table as delivered by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column whose lowercase name satisfies `matches`.
    pub(crate) fn find_column(&self, matches: impl Fn(&str) -> bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| matches(&column.to_ascii_lowercase()))
    }

    pub(crate) fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    /// Rows as JSON objects keyed by column name.
    pub(crate) fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<serde_json::Map<_, _>>()
            })
            .collect()
    }
}

/// `top`/`rising` sections for one entity in a related-data response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedBlock {
    pub top: RawPayload,
    pub rising: RawPayload,
}

/// Closed set of shapes the upstream adapter can hand back.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RawPayload {
    Table(Table),
    KeyedBlock(BTreeMap<String, RelatedBlock>),
    FlatList(Vec<Value>),
    #[default]
    Empty,
}

impl RawPayload {
    /// Best-effort classification of arbitrary JSON.
    ///
    /// `{"columns": [...], "rows": [...]}` is a table, an object whose values
    /// carry `top`/`rising` is a keyed block, an array is a flat list, and
    /// anything else (null, scalars, empty containers) is empty.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Array(items) if items.is_empty() => Self::Empty,
            Value::Array(items) => Self::FlatList(items.clone()),
            Value::Object(map) if map.is_empty() => Self::Empty,
            Value::Object(map) => {
                if let (Some(Value::Array(columns)), Some(Value::Array(rows))) =
                    (map.get("columns"), map.get("rows"))
                {
                    let columns = columns
                        .iter()
                        .map(|column| match column {
                            Value::String(name) => name.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    let rows = rows
                        .iter()
                        .map(|row| match row {
                            Value::Array(cells) => cells.clone(),
                            other => vec![other.clone()],
                        })
                        .collect();
                    return Self::Table(Table::new(columns, rows));
                }

                let blocks = map
                    .iter()
                    .filter_map(|(entity, block)| {
                        let block = block.as_object()?;
                        if !block.contains_key("top") && !block.contains_key("rising") {
                            return None;
                        }
                        Some((
                            entity.clone(),
                            RelatedBlock {
                                top: block.get("top").map(Self::from_json).unwrap_or_default(),
                                rising: block
                                    .get("rising")
                                    .map(Self::from_json)
                                    .unwrap_or_default(),
                            },
                        ))
                    })
                    .collect::<BTreeMap<_, _>>();
                if blocks.is_empty() {
                    Self::FlatList(vec![value.clone()])
                } else {
                    Self::KeyedBlock(blocks)
                }
            }
            _ => Self::Empty,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Self::Table(_) => "table",
            Self::KeyedBlock(_) => "keyed_block",
            Self::FlatList(_) => "flat_list",
            Self::Empty => "empty",
        }
    }
}

/// Canonical record stored in the cache and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricPayload {
    InterestOverTime(InterestSummary),
    RelatedQueries(RelatedQueries),
    RelatedTopics(RelatedTopics),
    InterestByRegion(RegionalInterest),
}

impl MetricPayload {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::InterestOverTime(_) => MetricKind::InterestOverTime,
            Self::RelatedQueries(_) => MetricKind::RelatedQueries,
            Self::RelatedTopics(_) => MetricKind::RelatedTopics,
            Self::InterestByRegion(_) => MetricKind::InterestByRegion,
        }
    }

    /// No usable data points, top entries or regions.
    pub fn is_structurally_empty(&self) -> bool {
        match self {
            Self::InterestOverTime(summary) => summary.data_points == 0,
            Self::RelatedQueries(related) => related.top_queries.is_empty(),
            Self::RelatedTopics(related) => related.top_topics.is_empty(),
            Self::InterestByRegion(regional) => regional.top_regions.is_empty(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::InterestOverTime(summary) => summary.error.as_deref(),
            Self::RelatedQueries(related) => related.error.as_deref(),
            Self::RelatedTopics(related) => related.error.as_deref(),
            Self::InterestByRegion(regional) => regional.error.as_deref(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a stored record; the kind selects the shape.
    pub fn from_json(kind: MetricKind, payload: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            MetricKind::InterestOverTime => Self::InterestOverTime(serde_json::from_str(payload)?),
            MetricKind::RelatedQueries => Self::RelatedQueries(serde_json::from_str(payload)?),
            MetricKind::RelatedTopics => Self::RelatedTopics(serde_json::from_str(payload)?),
            MetricKind::InterestByRegion => Self::InterestByRegion(serde_json::from_str(payload)?),
        })
    }
}

/// Turns a raw payload into the canonical record for `kind`.
pub fn normalize(kind: MetricKind, entity: &str, raw: &RawPayload) -> MetricPayload {
    match kind {
        MetricKind::InterestOverTime => {
            MetricPayload::InterestOverTime(interest::summarize(entity, raw))
        }
        MetricKind::RelatedQueries => MetricPayload::RelatedQueries(related::queries(entity, raw)),
        MetricKind::RelatedTopics => MetricPayload::RelatedTopics(related::topics(entity, raw)),
        MetricKind::InterestByRegion => {
            MetricPayload::InterestByRegion(regions::distribute(entity, raw))
        }
    }
}

/// Numeric reading of a cell: numbers, numeric strings, single-element arrays
/// (`[42]`), and `"<1"` (read as 0.5). Non-finite readings are dropped.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    let reading = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let text = text.trim().trim_end_matches('%').replace(',', "");
            if text == "<1" {
                Some(0.5)
            } else {
                text.parse::<f64>().ok()
            }
        }
        Value::Array(items) if items.len() == 1 => numeric(&items[0]),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    };
    reading.filter(|value| value.is_finite())
}

pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_json_shapes() {
        assert_eq!(RawPayload::from_json(&Value::Null), RawPayload::Empty);
        assert_eq!(RawPayload::from_json(&json!([])), RawPayload::Empty);
        assert_eq!(RawPayload::from_json(&json!([1, 2])).shape(), "flat_list");
        assert_eq!(
            RawPayload::from_json(&json!({"columns": ["a"], "rows": [[1]]})).shape(),
            "table"
        );

        let keyed = RawPayload::from_json(&json!({"malaria": {"top": [{"query": "x"}]}}));
        let RawPayload::KeyedBlock(blocks) = keyed else {
            panic!("expected keyed block");
        };
        assert_eq!(blocks["malaria"].rising, RawPayload::Empty);
        assert_eq!(blocks["malaria"].top.shape(), "flat_list");
    }

    #[test]
    fn numeric_reads_upstream_spellings() {
        assert_eq!(numeric(&json!(12)), Some(12.0));
        assert_eq!(numeric(&json!("1,250")), Some(1250.0));
        assert_eq!(numeric(&json!("<1")), Some(0.5));
        assert_eq!(numeric(&json!([7])), Some(7.0));
        assert_eq!(numeric(&json!("Breakout")), None);
    }

    #[test]
    fn stored_payload_decodes_by_kind() {
        let payload = normalize(MetricKind::RelatedQueries, "malaria", &RawPayload::Empty);
        let json = payload.to_json().expect("must serialize");
        let decoded =
            MetricPayload::from_json(MetricKind::RelatedQueries, &json).expect("must decode");
        assert_eq!(decoded, payload);
        assert!(decoded.is_structurally_empty());
    }
}
