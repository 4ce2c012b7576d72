use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{numeric, text, RawPayload, RelatedBlock};

const MAX_ITEMS: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedQuery {
    pub query: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedTopic {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_type: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedQueries {
    pub top_queries: Vec<RelatedQuery>,
    pub rising_queries: Vec<RelatedQuery>,
    pub total_top: usize,
    pub total_rising: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedTopics {
    pub top_topics: Vec<RelatedTopic>,
    pub rising_topics: Vec<RelatedTopic>,
    pub total_top: usize,
    pub total_rising: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Sections {
    top: Vec<Map<String, Value>>,
    rising: Vec<Map<String, Value>>,
}

impl Sections {
    const fn empty() -> Self {
        Self {
            top: Vec::new(),
            rising: Vec::new(),
        }
    }

    fn record_count(&self) -> usize {
        self.top.len() + self.rising.len()
    }
}

/// Set when the upstream sent records but none carried a label.
fn unreadable(raw: &RawPayload, sections: &Sections, parsed: usize) -> Option<String> {
    (sections.record_count() > 0 && parsed == 0).then(|| {
        format!(
            "{} related entries in {} payload had no readable label",
            sections.record_count(),
            raw.shape()
        )
    })
}

pub(super) fn queries(entity: &str, raw: &RawPayload) -> RelatedQueries {
    let sections = sections(entity, raw, "query");
    let top = sections.top.iter().filter_map(query_from).collect::<Vec<_>>();
    let rising = sections.rising.iter().filter_map(query_from).collect::<Vec<_>>();
    let error = unreadable(raw, &sections, top.len() + rising.len());

    RelatedQueries {
        total_top: top.len(),
        total_rising: rising.len(),
        top_queries: top.into_iter().take(MAX_ITEMS).collect(),
        rising_queries: rising.into_iter().take(MAX_ITEMS).collect(),
        error,
    }
}

pub(super) fn topics(entity: &str, raw: &RawPayload) -> RelatedTopics {
    let sections = sections(entity, raw, "topic_title");
    let top = sections.top.iter().filter_map(topic_from).collect::<Vec<_>>();
    let rising = sections.rising.iter().filter_map(topic_from).collect::<Vec<_>>();
    let error = unreadable(raw, &sections, top.len() + rising.len());

    RelatedTopics {
        total_top: top.len(),
        total_rising: rising.len(),
        top_topics: top.into_iter().take(MAX_ITEMS).collect(),
        rising_topics: rising.into_iter().take(MAX_ITEMS).collect(),
        error,
    }
}

fn sections(entity: &str, raw: &RawPayload, label_key: &str) -> Sections {
    match raw {
        RawPayload::Empty => Sections::empty(),
        RawPayload::KeyedBlock(blocks) => {
            let block = blocks
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(entity))
                .or_else(|| blocks.iter().next())
                .map(|(_, block)| block);
            match block {
                Some(RelatedBlock { top, rising }) => Sections {
                    top: items(top, label_key),
                    rising: items(rising, label_key),
                },
                None => Sections::empty(),
            }
        }
        // A bare table or list has no rising section.
        RawPayload::Table(_) | RawPayload::FlatList(_) => Sections {
            top: items(raw, label_key),
            rising: Vec::new(),
        },
    }
}

/// Flattens one section into records. Bare strings become `{label_key: s}`.
fn items(raw: &RawPayload, label_key: &str) -> Vec<Map<String, Value>> {
    match raw {
        RawPayload::Table(table) => table.records(),
        RawPayload::FlatList(values) => values
            .iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map.clone()),
                Value::String(label) => {
                    let mut map = Map::new();
                    map.insert(label_key.to_owned(), Value::String(label.clone()));
                    Some(map)
                }
                _ => None,
            })
            .collect(),
        RawPayload::KeyedBlock(_) | RawPayload::Empty => Vec::new(),
    }
}

fn query_from(record: &Map<String, Value>) -> Option<RelatedQuery> {
    let query = record
        .get("query")
        .or_else(|| record.get("title"))
        .and_then(text)?;
    let (value, formatted_value) = value_of(record);
    Some(RelatedQuery {
        query,
        value,
        formatted_value,
    })
}

/// Accepts flat columns (`topic_title`, `topic_type`) and the nested
/// `{"topic": {"title", "type"}}` form.
fn topic_from(record: &Map<String, Value>) -> Option<RelatedTopic> {
    let nested = record.get("topic").and_then(Value::as_object);
    let title = nested
        .and_then(|topic| topic.get("title"))
        .or_else(|| record.get("topic_title"))
        .or_else(|| record.get("title"))
        .and_then(text)?;
    let topic_type = nested
        .and_then(|topic| topic.get("type"))
        .or_else(|| record.get("topic_type"))
        .or_else(|| record.get("type"))
        .and_then(text);
    let (value, formatted_value) = value_of(record);
    Some(RelatedTopic {
        title,
        topic_type,
        value,
        formatted_value,
    })
}

/// Numeric value plus the display string; "Breakout" keeps value 0.
fn value_of(record: &Map<String, Value>) -> (f64, Option<String>) {
    let formatted = record
        .get("formattedValue")
        .or_else(|| record.get("formatted_value"))
        .and_then(text);
    let value = record.get("value").and_then(numeric).unwrap_or(0.0);
    (value, formatted)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::processor::Table;

    #[test]
    fn reads_keyed_block_for_entity() {
        let mut blocks = BTreeMap::new();
        blocks.insert(
            String::from("Malaria"),
            RelatedBlock {
                top: RawPayload::FlatList(vec![
                    json!({"query": "malaria symptoms", "value": 100, "formattedValue": "100"}),
                    json!({"query": "malaria treatment", "value": 45}),
                ]),
                rising: RawPayload::FlatList(vec![
                    json!({"query": "malaria vaccine", "value": 3250, "formattedValue": "Breakout"}),
                ]),
            },
        );

        let related = queries("malaria", &RawPayload::KeyedBlock(blocks));

        assert_eq!(related.total_top, 2);
        assert_eq!(related.top_queries[0].query, "malaria symptoms");
        assert_eq!(related.rising_queries[0].formatted_value.as_deref(), Some("Breakout"));
        assert!(related.error.is_none());
    }

    #[test]
    fn partially_populated_block_keeps_present_section() {
        let mut blocks = BTreeMap::new();
        blocks.insert(
            String::from("cholera"),
            RelatedBlock {
                top: RawPayload::Empty,
                rising: RawPayload::FlatList(vec![json!("cholera outbreak")]),
            },
        );

        let related = queries("cholera", &RawPayload::KeyedBlock(blocks));
        assert!(related.top_queries.is_empty());
        assert_eq!(related.rising_queries[0].query, "cholera outbreak");
    }

    #[test]
    fn reads_topics_from_nested_and_tabular_forms() {
        let nested = RawPayload::FlatList(vec![json!({
            "topic": {"mid": "/m/05t0k", "title": "Malaria", "type": "Disease"},
            "value": 100,
        })]);
        let related = topics("malaria", &nested);
        assert_eq!(related.top_topics[0].topic_type.as_deref(), Some("Disease"));

        let table = RawPayload::Table(Table::new(
            vec!["topic_title".into(), "topic_type".into(), "value".into()],
            vec![vec![json!("Mosquito"), json!("Insect"), json!(40)]],
        ));
        let related = topics("malaria", &table);
        assert_eq!(related.top_topics[0].title, "Mosquito");
        assert_eq!(related.total_rising, 0);
    }

    #[test]
    fn skips_items_without_labels() {
        let raw = RawPayload::FlatList(vec![json!({"value": 3}), json!(12), json!(null)]);
        let related = queries("malaria", &raw);
        assert_eq!(related.total_top, 0);
        assert!(related.error.is_some());
    }
}
