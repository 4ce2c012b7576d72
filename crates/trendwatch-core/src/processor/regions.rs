use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{numeric, round2, text, RawPayload, Table};

const TOP_REGIONS: usize = 10;

/// Ghana region codes. Each code has exactly one name.
const REGION_CODES: [(&str, &str); 27] = [
    ("GH-AA", "Greater Accra"),
    ("GH-AH", "Ashanti"),
    ("GH-BA", "Brong-Ahafo"),
    ("GH-CP", "Central"),
    ("GH-EP", "Eastern"),
    ("GH-NP", "Northern"),
    ("GH-TV", "Volta"),
    ("GH-UE", "Upper East"),
    ("GH-UW", "Upper West"),
    ("GH-WP", "Western"),
    ("GH-AF", "Ahafo"),
    ("GH-BO", "Bono"),
    ("GH-BE", "Bono East"),
    ("GH-NE", "North East"),
    ("GH-OT", "Oti"),
    ("GH-SV", "Savannah"),
    ("GH-WN", "Western North"),
    ("01", "Greater Accra"),
    ("02", "Ashanti"),
    ("03", "Brong-Ahafo"),
    ("04", "Central"),
    ("05", "Eastern"),
    ("06", "Northern"),
    ("08", "Volta"),
    ("09", "Western"),
    ("10", "Upper East"),
    ("11", "Upper West"),
];

/// Coarse zones for numeric codes missing from the table.
const NUMERIC_ZONES: [(u32, u32, &str); 3] = [
    (1, 5, "Southern Zone"),
    (6, 9, "Middle Zone"),
    (10, 16, "Northern Zone"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInterest {
    pub region: String,
    pub interest: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionalInterest {
    pub top_regions: Vec<RegionInterest>,
    pub regional_distribution: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Maps an upstream region label to a display name.
///
/// Names pass through. Codes (`GH-AA`, `GH05`, `05`) resolve through the
/// table, then the numeric zones, then fall back to `Region <code>`. The
/// second value is a note for approximate or unknown mappings.
pub fn resolve_region(raw: &str) -> (String, Option<String>) {
    let label = raw.trim();
    if !looks_like_code(label) {
        return (label.to_owned(), None);
    }

    let code = label.to_ascii_uppercase();
    let numeric_part = code
        .strip_prefix("GH-")
        .or_else(|| code.strip_prefix("GH"))
        .filter(|rest| rest.chars().all(|ch| ch.is_ascii_digit()))
        .unwrap_or(&code);

    if let Some((_, name)) = REGION_CODES
        .iter()
        .find(|(known, _)| *known == code || *known == numeric_part)
    {
        return ((*name).to_owned(), None);
    }

    if let Ok(number) = numeric_part.parse::<u32>() {
        if let Some((_, _, zone)) = NUMERIC_ZONES
            .iter()
            .find(|(low, high, _)| (*low..=*high).contains(&number))
        {
            return (
                (*zone).to_owned(),
                Some(format!("approximate zone for region code {label}")),
            );
        }
    }

    (
        format!("Region {label}"),
        Some(String::from("unrecognized region code")),
    )
}

fn looks_like_code(label: &str) -> bool {
    if label.is_empty() {
        return false;
    }
    if label.chars().all(|ch| ch.is_ascii_digit()) {
        return true;
    }
    let upper = label.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("GH-") {
        return (1..=3).contains(&rest.len()) && rest.chars().all(|ch| ch.is_ascii_alphanumeric());
    }
    upper
        .strip_prefix("GH")
        .is_some_and(|rest| (1..=2).contains(&rest.len()) && rest.chars().all(|ch| ch.is_ascii_digit()))
}

pub(super) fn distribute(entity: &str, raw: &RawPayload) -> RegionalInterest {
    let pairs = match raw {
        RawPayload::Empty => return RegionalInterest::default(),
        RawPayload::Table(table) => pairs_from_table(entity, table),
        RawPayload::FlatList(items) => items.iter().filter_map(pair_from_item).collect(),
        RawPayload::KeyedBlock(_) => {
            return RegionalInterest {
                error: Some(String::from("related-data block cannot be read as regions")),
                ..RegionalInterest::default()
            }
        }
    };

    let mut regions = BTreeMap::<String, RegionInterest>::new();
    for (label, interest) in pairs {
        let (region, region_note) = resolve_region(&label);
        if region.is_empty() {
            continue;
        }
        // Several codes can fall into one zone; keep the strongest reading.
        let entry = regions.entry(region.clone()).or_insert(RegionInterest {
            region,
            interest,
            region_note: region_note.clone(),
        });
        if interest > entry.interest {
            entry.interest = interest;
            entry.region_note = region_note;
        }
    }

    let regional_distribution = regions
        .values()
        .map(|region| (region.region.clone(), round2(region.interest)))
        .collect();

    let mut top_regions = regions
        .into_values()
        .filter(|region| region.interest > 0.0)
        .collect::<Vec<_>>();
    top_regions.sort_by(|left, right| {
        right
            .interest
            .total_cmp(&left.interest)
            .then_with(|| left.region.cmp(&right.region))
    });
    top_regions.truncate(TOP_REGIONS);

    RegionalInterest {
        top_regions,
        regional_distribution,
        error: None,
    }
}

/// Finds region and interest columns by name, falling back to the first
/// column for the region and the last numeric column for the interest.
fn pairs_from_table(entity: &str, table: &Table) -> Vec<(String, f64)> {
    let entity = entity.to_ascii_lowercase();
    let region_column = table
        .find_column(|name| name.contains("region") || name == "geoname" || name == "geo_name")
        .or_else(|| table.find_column(|name| name == "geocode" || name == "geo" || name == "name"))
        .unwrap_or(0);
    let interest_column = table
        .find_column(|name| name == entity || name.contains("interest") || name == "value")
        .or_else(|| {
            (0..table.columns.len())
                .rev()
                .find(|&index| index != region_column && table.cell(0, index).and_then(numeric).is_some())
        });

    let Some(interest_column) = interest_column else {
        return Vec::new();
    };

    (0..table.rows.len())
        .filter_map(|row| {
            let label = table.cell(row, region_column).and_then(text)?;
            let interest = table.cell(row, interest_column).and_then(numeric)?;
            Some((label, interest))
        })
        .collect()
}

fn pair_from_item(item: &Value) -> Option<(String, f64)> {
    let map = item.as_object()?;
    let label = map
        .get("geoName")
        .or_else(|| map.get("region"))
        .or_else(|| map.get("geoCode"))
        .and_then(text)?;
    let interest = map
        .get("value")
        .or_else(|| map.get("interest"))
        .and_then(numeric)?;
    Some((label, interest))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolves_known_codes_to_single_name() {
        assert_eq!(resolve_region("GH-AA"), (String::from("Greater Accra"), None));
        assert_eq!(resolve_region("gh-tv"), (String::from("Volta"), None));
        assert_eq!(resolve_region("GH02"), (String::from("Ashanti"), None));
        assert_eq!(resolve_region("06"), (String::from("Northern"), None));
    }

    #[test]
    fn unmatched_numeric_codes_use_zones() {
        let (region, note) = resolve_region("07");
        assert_eq!(region, "Middle Zone");
        assert!(note.expect("note expected").contains("approximate"));

        let (region, _) = resolve_region("14");
        assert_eq!(region, "Northern Zone");
    }

    #[test]
    fn unknown_codes_keep_raw_label() {
        let (region, note) = resolve_region("GH-ZZ");
        assert_eq!(region, "Region GH-ZZ");
        assert!(note.is_some());

        assert_eq!(resolve_region("Ashanti"), (String::from("Ashanti"), None));
        assert_eq!(resolve_region("Ghana"), (String::from("Ghana"), None));
    }

    #[test]
    fn ranks_regions_from_named_columns() {
        let table = Table::new(
            vec!["geoName".into(), "malaria".into()],
            vec![
                vec![json!("GH-AA"), json!(40)],
                vec![json!("GH-NP"), json!(100)],
                vec![json!("GH-UE"), json!(0)],
            ],
        );

        let regional = distribute("malaria", &RawPayload::Table(table));

        assert_eq!(regional.top_regions.len(), 2);
        assert_eq!(regional.top_regions[0].region, "Northern");
        assert_eq!(regional.regional_distribution["Upper East"], 0.0);
    }

    #[test]
    fn falls_back_to_column_positions() {
        let table = Table::new(
            vec!["location".into(), "score".into()],
            vec![vec![json!("Ashanti"), json!(55)]],
        );

        let regional = distribute("cholera", &RawPayload::Table(table));

        assert_eq!(regional.top_regions[0].region, "Ashanti");
        assert_eq!(regional.top_regions[0].interest, 55.0);
    }

    #[test]
    fn all_zero_interest_is_structurally_empty() {
        let items = vec![json!({"geoCode": "GH-AA", "value": [0]})];
        let regional = distribute("typhoid", &RawPayload::FlatList(items));
        assert!(regional.top_regions.is_empty());
        assert_eq!(regional.regional_distribution.len(), 1);
    }
}
