use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TrendsConfig;
use crate::domain::MetricKind;
use crate::http_client::{HttpClient, HttpErrorKind, HttpRequest, ReqwestHttpClient};
use crate::processor::{RawPayload, RelatedBlock, Table};
use crate::upstream::{PayloadHandle, PayloadRequest, TrendsSource, UpstreamError, UpstreamFuture};

const HOME_URL: &str = "https://trends.google.com/";
const EXPLORE_URL: &str = "https://trends.google.com/trends/api/explore";
const WIDGET_URL: &str = "https://trends.google.com/trends/api/widgetdata";

/// Google Trends over the public web API.
///
/// `build_payload` calls `explore` to obtain one widget token per metric
/// kind; `fetch` calls the matching `widgetdata` endpoint.
#[derive(Clone)]
pub struct GoogleTrendsAdapter {
    http_client: Arc<dyn HttpClient>,
    host_language: String,
    tz_offset_minutes: i32,
    timeout_ms: u64,
    session_ready: Arc<AtomicBool>,
}

impl GoogleTrendsAdapter {
    pub fn new(config: &TrendsConfig) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()), config)
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, config: &TrendsConfig) -> Self {
        Self {
            http_client,
            host_language: config.host_language.clone(),
            tz_offset_minutes: config.tz_offset_minutes,
            timeout_ms: 15_000,
            session_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn request(&self, url: impl Into<String>) -> HttpRequest {
        HttpRequest::get(url)
            .with_query("hl", self.host_language.as_str())
            .with_query("tz", self.tz_offset_minutes.to_string())
            .with_header("accept", "application/json, text/plain, */*")
            .with_timeout_ms(self.timeout_ms)
    }

    /// Visits the landing page once so the cookie jar holds a session cookie.
    async fn ensure_session(&self) -> Result<(), UpstreamError> {
        if self.session_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let response = self
            .http_client
            .execute(HttpRequest::get(HOME_URL).with_timeout_ms(self.timeout_ms))
            .await
            .map_err(transport_error)?;
        if response.status == 429 {
            return Err(UpstreamError::rate_limited("google trends refused the session request"));
        }
        self.session_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn get_json(&self, request: HttpRequest) -> Result<Value, UpstreamError> {
        let url = request.url.clone();
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(transport_error)?;

        if response.status == 429 {
            return Err(UpstreamError::rate_limited(format!(
                "google trends returned 429 for {url}"
            )));
        }
        if !response.is_success() {
            return Err(UpstreamError::upstream(format!(
                "google trends returned status {} for {url}",
                response.status
            )));
        }

        serde_json::from_str(strip_guard(&response.body)).map_err(|error| {
            UpstreamError::malformed(format!("unparsable body from {url}: {error}"))
        })
    }
}

impl TrendsSource for GoogleTrendsAdapter {
    fn name(&self) -> &'static str {
        "google_trends"
    }

    fn build_payload<'a>(&'a self, request: &'a PayloadRequest) -> UpstreamFuture<'a, PayloadHandle> {
        Box::pin(async move {
            self.ensure_session().await?;

            let query = json!({
                "comparisonItem": [{
                    "keyword": request.entity.as_str(),
                    "time": request.timeframe.token(),
                    "geo": request.geo.as_str(),
                }],
                "category": 0,
                "property": "",
            });
            let explore = self
                .get_json(self.request(EXPLORE_URL).with_query("req", query.to_string()))
                .await?;

            let widgets = explore
                .get("widgets")
                .and_then(Value::as_array)
                .ok_or_else(|| UpstreamError::malformed("explore response has no widgets"))?;

            let mut handle = PayloadHandle::new(request.clone());
            for widget in widgets {
                let Some(kind) = widget.get("id").and_then(Value::as_str).and_then(kind_for_widget)
                else {
                    continue;
                };
                handle.widgets.entry(kind).or_insert_with(|| widget.clone());
            }
            debug!(
                entity = %request.entity,
                timeframe = %request.timeframe,
                geo = %request.geo,
                widgets = handle.widgets.len(),
                "built google trends payload"
            );
            Ok(handle)
        })
    }

    fn fetch<'a>(&'a self, handle: &'a PayloadHandle, kind: MetricKind) -> UpstreamFuture<'a, RawPayload> {
        Box::pin(async move {
            let Some(widget) = handle.widgets.get(&kind) else {
                // The upstream omits widgets it has no data for.
                return Ok(RawPayload::Empty);
            };
            let token = widget
                .get("token")
                .and_then(Value::as_str)
                .ok_or_else(|| UpstreamError::malformed(format!("{kind} widget has no token")))?;
            let mut widget_request = widget.get("request").cloned().unwrap_or(Value::Null);
            if kind == MetricKind::InterestByRegion {
                if let Some(body) = widget_request.as_object_mut() {
                    body.insert(String::from("resolution"), json!(region_resolution(handle)));
                    body.insert(String::from("includeLowSearchVolumeGeos"), json!(false));
                }
            }

            let body = self
                .get_json(
                    self.request(format!("{WIDGET_URL}/{}", endpoint_for(kind)))
                        .with_query("req", widget_request.to_string())
                        .with_query("token", token),
                )
                .await?;

            let entity = handle.request.entity.as_str();
            let raw = match kind {
                MetricKind::InterestOverTime => timeline_table(entity, &body),
                MetricKind::InterestByRegion => geo_table(entity, &body),
                MetricKind::RelatedQueries | MetricKind::RelatedTopics => ranked_block(entity, &body),
            };
            if raw == RawPayload::Empty {
                warn!(entity, metric_kind = %kind, "google trends returned no rows");
            }
            Ok(raw)
        })
    }
}

fn transport_error(error: crate::http_client::HttpError) -> UpstreamError {
    match error.kind() {
        HttpErrorKind::Timeout | HttpErrorKind::Connect => {
            UpstreamError::unavailable(format!("google trends unreachable: {}", error.message()))
        }
        HttpErrorKind::Other => {
            UpstreamError::upstream(format!("google trends transport error: {}", error.message()))
        }
    }
}

/// Drops the `)]}'` anti-hijacking prefix (and the trailing comma some
/// endpoints add).
fn strip_guard(body: &str) -> &str {
    let trimmed = body.trim_start();
    match trimmed.strip_prefix(")]}'") {
        Some(rest) => rest.trim_start_matches(',').trim_start(),
        None => trimmed,
    }
}

fn kind_for_widget(id: &str) -> Option<MetricKind> {
    if id.starts_with("TIMESERIES") {
        Some(MetricKind::InterestOverTime)
    } else if id.starts_with("GEO_MAP") {
        Some(MetricKind::InterestByRegion)
    } else if id.starts_with("RELATED_TOPICS") {
        Some(MetricKind::RelatedTopics)
    } else if id.starts_with("RELATED_QUERIES") {
        Some(MetricKind::RelatedQueries)
    } else {
        None
    }
}

const fn endpoint_for(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::InterestOverTime => "multiline",
        MetricKind::InterestByRegion => "comparedgeo",
        MetricKind::RelatedQueries | MetricKind::RelatedTopics => "relatedsearches",
    }
}

fn region_resolution(handle: &PayloadHandle) -> &'static str {
    let geo = handle.request.geo.as_str();
    if geo.is_empty() {
        "COUNTRY"
    } else if geo.contains('-') {
        "CITY"
    } else {
        "REGION"
    }
}

fn default_section<'a>(body: &'a Value, field: &str) -> Option<&'a Vec<Value>> {
    body.get("default")?.get(field)?.as_array()
}

fn timeline_table(entity: &str, body: &Value) -> RawPayload {
    let Some(points) = default_section(body, "timelineData") else {
        return RawPayload::Empty;
    };
    let rows = points
        .iter()
        .map(|point| {
            vec![
                point
                    .get("formattedTime")
                    .or_else(|| point.get("time"))
                    .cloned()
                    .unwrap_or(Value::Null),
                point.get("value").cloned().unwrap_or(Value::Null),
                json!(point.get("isPartial").and_then(Value::as_bool).unwrap_or(false)),
            ]
        })
        .collect::<Vec<_>>();
    if rows.is_empty() {
        return RawPayload::Empty;
    }
    RawPayload::Table(Table::new(
        vec![String::from("date"), entity.to_owned(), String::from("isPartial")],
        rows,
    ))
}

fn geo_table(entity: &str, body: &Value) -> RawPayload {
    let Some(regions) = default_section(body, "geoMapData") else {
        return RawPayload::Empty;
    };
    let rows = regions
        .iter()
        .map(|region| {
            let name = region
                .get("geoName")
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty());
            let code = region.get("geoCode").cloned().unwrap_or(Value::Null);
            vec![
                name.map(|name| json!(name)).unwrap_or_else(|| code.clone()),
                code,
                region.get("value").cloned().unwrap_or(Value::Null),
            ]
        })
        .collect::<Vec<_>>();
    if rows.is_empty() {
        return RawPayload::Empty;
    }
    RawPayload::Table(Table::new(
        vec![String::from("geoName"), String::from("geoCode"), entity.to_owned()],
        rows,
    ))
}

/// `rankedList[0]` holds the top entries and `rankedList[1]` the rising ones.
fn ranked_block(entity: &str, body: &Value) -> RawPayload {
    let Some(ranked) = default_section(body, "rankedList") else {
        return RawPayload::Empty;
    };
    let section = |index: usize| {
        ranked
            .get(index)
            .and_then(|list| list.get("rankedKeyword"))
            .map(RawPayload::from_json)
            .unwrap_or_default()
    };
    let block = RelatedBlock {
        top: section(0),
        rising: section(1),
    };
    if block.top == RawPayload::Empty && block.rising == RawPayload::Empty {
        return RawPayload::Empty;
    }
    RawPayload::KeyedBlock(BTreeMap::from([(entity.to_owned(), block)]))
}
