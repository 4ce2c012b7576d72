use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// GET request with query parameters, encoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            timeout_ms: 15_000,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// URL with the percent-encoded query string appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport used by upstream adapters.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> HttpFuture<'_>;
}

/// Replays canned responses chosen by URL substring; records every request.
///
/// Routes are matched in insertion order. Unmatched requests get a 404.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHttpClient {
    routes: Arc<Mutex<Vec<(String, HttpResponse)>>>,
    seen: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url_fragment: impl Into<String>, response: HttpResponse) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((url_fragment.into(), response));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture<'_> {
        Box::pin(async move {
            let response = self
                .routes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| HttpResponse::new(404, "no scripted route"));
            self.seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(request);
            Ok(response)
        })
    }
}

/// reqwest transport with a cookie jar; the upstream hands out a session
/// cookie on first contact and expects it back.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("trendwatch/", env!("CARGO_PKG_VERSION")))
                    .cookie_store(true)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture<'_> {
        Box::pin(async move {
            let mut builder = self
                .client
                .get(request.full_url())
                .timeout(Duration::from_millis(request.timeout_ms));
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|error| {
                let kind = if error.is_timeout() {
                    HttpErrorKind::Timeout
                } else if error.is_connect() {
                    HttpErrorKind::Connect
                } else {
                    HttpErrorKind::Other
                };
                HttpError::new(kind, format!("request failed: {error}"))
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|error| {
                HttpError::new(
                    HttpErrorKind::Other,
                    format!("failed to read response body: {error}"),
                )
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_query_parameters() {
        let request = HttpRequest::get("https://example.test/api")
            .with_query("hl", "en-US")
            .with_query("req", r#"{"time":"today 3-m"}"#);

        assert_eq!(
            request.full_url(),
            "https://example.test/api?hl=en-US&req=%7B%22time%22%3A%22today%203-m%22%7D"
        );
    }

    #[tokio::test]
    async fn scripted_client_matches_routes_in_order() {
        let client = ScriptedHttpClient::new()
            .route("/explore", HttpResponse::ok("explore"))
            .route("/widgetdata", HttpResponse::new(429, "slow down"));

        let explore = client
            .execute(HttpRequest::get("https://host/api/explore"))
            .await
            .expect("scripted");
        let widget = client
            .execute(HttpRequest::get("https://host/api/widgetdata/multiline"))
            .await
            .expect("scripted");
        let missing = client
            .execute(HttpRequest::get("https://host/other"))
            .await
            .expect("scripted");

        assert_eq!(explore.body, "explore");
        assert_eq!(widget.status, 429);
        assert_eq!(missing.status, 404);
        assert_eq!(client.requests().len(), 3);
    }
}
