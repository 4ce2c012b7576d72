use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{numeric, round2, RawPayload, Table};

/// Relative volume represented by one interest point in `total_searches`.
const SEARCHES_PER_POINT: f64 = 100.0;
const TREND_THRESHOLD: f64 = 0.10;
const TREND_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    #[default]
    Stable,
}

/// Summary of an interest-over-time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestSummary {
    pub current_interest: f64,
    pub peak_interest: f64,
    pub average_interest: f64,
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    /// Approximate volume derived from the summed interest index.
    pub total_searches: u64,
    pub data_points: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(super) fn summarize(entity: &str, raw: &RawPayload) -> InterestSummary {
    let points = match raw {
        RawPayload::Empty => return InterestSummary::default(),
        RawPayload::Table(table) => match series_from_table(entity, table) {
            Some(points) => points,
            None => return annotated("no numeric interest column in table"),
        },
        RawPayload::FlatList(items) => items.iter().filter_map(point_from_item).collect(),
        RawPayload::KeyedBlock(_) => {
            return annotated("related-data block cannot be read as a time series")
        }
    };

    summarize_points(&points)
}

fn annotated(message: &str) -> InterestSummary {
    InterestSummary {
        error: Some(message.to_owned()),
        ..InterestSummary::default()
    }
}

pub(crate) fn summarize_points(points: &[f64]) -> InterestSummary {
    let Some(&current) = points.last() else {
        return InterestSummary::default();
    };

    let peak = points.iter().copied().fold(f64::MIN, f64::max);
    let sum = points.iter().sum::<f64>();
    let (direction, strength) = trend(points);

    InterestSummary {
        current_interest: current,
        peak_interest: peak,
        average_interest: round2(sum / points.len() as f64),
        trend_direction: direction,
        trend_strength: round2(strength),
        total_searches: (sum * SEARCHES_PER_POINT).round().max(0.0) as u64,
        data_points: points.len(),
        error: None,
    }
}

/// Compares the mean of the last points against the mean of the first ones.
fn trend(points: &[f64]) -> (TrendDirection, f64) {
    let window = TREND_WINDOW.min(points.len());
    let early = mean(&points[..window]);
    let recent = mean(&points[points.len() - window..]);

    if early <= 0.0 {
        return if recent > 0.0 {
            (TrendDirection::Rising, 1.0)
        } else {
            (TrendDirection::Stable, 0.0)
        };
    }

    let change = (recent - early) / early;
    let direction = if change > TREND_THRESHOLD {
        TrendDirection::Rising
    } else if change < -TREND_THRESHOLD {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    };
    (direction, change.abs().clamp(0.0, 1.0))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Picks the entity column, then `value`/`interest`, then the first column
/// holding numbers that is not a date or partial flag.
fn series_from_table(entity: &str, table: &Table) -> Option<Vec<f64>> {
    let entity = entity.to_ascii_lowercase();
    let column = table
        .find_column(|name| name == entity)
        .or_else(|| table.find_column(|name| name == "value" || name == "interest"))
        .or_else(|| {
            (0..table.columns.len()).find(|&index| {
                let name = table.columns[index].to_ascii_lowercase();
                let excluded = name.contains("date") || name.contains("time") || name == "ispartial";
                !excluded && table.cell(0, index).and_then(numeric).is_some()
            })
        })?;

    Some(
        (0..table.rows.len())
            .filter_map(|row| table.cell(row, column).and_then(numeric))
            .collect(),
    )
}

fn point_from_item(item: &Value) -> Option<f64> {
    match item {
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("interest"))
            .and_then(numeric),
        other => numeric(other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detects_rising_trend() {
        let summary = summarize_points(&[10.0, 10.0, 10.0, 20.0, 30.0, 40.0]);

        assert_eq!(summary.trend_direction, TrendDirection::Rising);
        assert_eq!(summary.trend_strength, 1.0);
        assert_eq!(summary.current_interest, 40.0);
        assert_eq!(summary.peak_interest, 40.0);
        assert_eq!(summary.average_interest, 20.0);
        assert_eq!(summary.total_searches, 12_000);
        assert_eq!(summary.data_points, 6);
    }

    #[test]
    fn small_changes_are_stable() {
        let summary = summarize_points(&[50.0, 50.0, 50.0, 52.0, 53.0, 54.0]);
        assert_eq!(summary.trend_direction, TrendDirection::Stable);
        assert!(summary.trend_strength < 0.1);
    }

    #[test]
    fn falling_strength_is_relative_drop() {
        let summary = summarize_points(&[100.0, 100.0, 100.0, 50.0, 50.0, 50.0]);
        assert_eq!(summary.trend_direction, TrendDirection::Falling);
        assert_eq!(summary.trend_strength, 0.5);
    }

    #[test]
    fn empty_series_is_valid_and_unannotated() {
        let summary = summarize("malaria", &RawPayload::Empty);
        assert_eq!(summary.data_points, 0);
        assert_eq!(summary.trend_direction, TrendDirection::Stable);
        assert!(summary.error.is_none());
    }

    #[test]
    fn reads_entity_column_from_table() {
        let table = Table::new(
            vec!["date".into(), "Malaria".into(), "isPartial".into()],
            vec![
                vec![json!("2024-01-01"), json!(5), json!(false)],
                vec![json!("2024-01-08"), json!("<1"), json!(false)],
                vec![json!("2024-01-15"), json!(9), json!(true)],
            ],
        );

        let summary = summarize("malaria", &RawPayload::Table(table));
        assert_eq!(summary.data_points, 3);
        assert_eq!(summary.peak_interest, 9.0);
    }

    #[test]
    fn keyed_block_is_annotated() {
        let summary = summarize("malaria", &RawPayload::KeyedBlock(Default::default()));
        assert_eq!(summary.data_points, 0);
        assert!(summary.error.is_some());
    }
}
