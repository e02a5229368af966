//! Asynchronous HTTP bridge.
//!
//! [`HttpBridge::request`] parks the calling task in
//! `Suspended(Http)` until the response body has arrived, the transfer
//! fails, or the request's timeout elapses. Many requests may be
//! outstanding at once; each resolves independently. A timeout drops the
//! in-flight transfer and fails only that one request.

mod template;

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sprocket_core::text::FormatError;
use sprocket_core::{SuspendReason, suspend};
use thiserror::Error;
use tracing::{debug, warn};

pub use reqwest::Method;
pub use template::expand as expand_url;

// =============================================================================
// Configuration
// =============================================================================

/// Process-wide HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to requests that do not set their own, in
    /// milliseconds. `0` disables the default timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    concat!("sprocket/", env!("CARGO_PKG_VERSION")).to_string()
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`HttpBridge::request`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// The URL template could not be expanded.
    #[error("invalid URL template '{template}': {source}")]
    Template {
        template: String,
        #[source]
        source: FormatError,
    },

    /// The expanded URL does not parse.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request did not finish within its timeout.
    #[error("request to {url} timed out after {}ms", .after.as_millis())]
    Timeout { url: String, after: Duration },

    /// The transfer failed.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response body: {0}")]
    Body(String),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// An outbound request. The URL is a template whose `{name}` placeholders
/// are filled from [`bind`](Self::bind) values.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url_template: String,
    bindings: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url_template: impl Into<String>) -> Self {
        Self {
            method,
            url_template: url_template.into(),
            bindings: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url_template: impl Into<String>) -> Self {
        Self::new(Method::GET, url_template)
    }

    pub fn post(url_template: impl Into<String>) -> Self {
        Self::new(Method::POST, url_template)
    }

    /// Binds a value to the `{name}` placeholder.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the request body and sets the content type.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(value).map_err(HttpError::Encode)?;
        Ok(self.header(CONTENT_TYPE.as_str(), "application/json").body(body))
    }

    /// Overrides the bridge's default timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Expands and parses the URL.
    pub fn url(&self) -> Result<Url, HttpError> {
        let expanded =
            template::expand(&self.url_template, &self.bindings).map_err(|source| {
                HttpError::Template {
                    template: self.url_template.clone(),
                    source,
                }
            })?;
        Url::parse(&expanded).map_err(|e| HttpError::InvalidUrl {
            url: expanded,
            reason: e.to_string(),
        })
    }
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Body(e.to_string()))
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// Shared HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    client: Client,
    default_timeout: Option<Duration>,
}

impl HttpBridge {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self::with_client(client, config.default_timeout()))
    }

    /// Wraps an existing client.
    pub fn with_client(client: Client, default_timeout: Option<Duration>) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    /// Performs `request`, suspending the current task until it resolves.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        suspend(SuspendReason::Http, self.perform(request)).await
    }

    /// Shorthand for a GET with bound placeholders.
    pub async fn get(
        &self,
        url_template: &str,
        bindings: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let request = bindings
            .iter()
            .fold(HttpRequest::get(url_template), |req, (k, v)| req.bind(*k, *v));
        self.request(request).await
    }

    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url()?;
        let url_text = url.to_string();
        let limit = request.timeout.or(self.default_timeout);

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!(method = %request.method, url = %url_text, timeout_ms = ?limit.map(|d| d.as_millis()), "Sending HTTP request");

        let transfer = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        let outcome = match limit {
            Some(after) => match tokio::time::timeout(after, transfer).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(url = %url_text, after_ms = after.as_millis() as u64, "HTTP request timed out");
                    return Err(HttpError::Timeout {
                        url: url_text,
                        after,
                    });
                }
            },
            None => transfer.await,
        };

        match outcome {
            Ok(response) => {
                debug!(url = %url_text, status = response.status, bytes = response.body.len(), "HTTP response received");
                Ok(response)
            }
            Err(source) => match limit {
                Some(after) if source.is_timeout() => Err(HttpError::Timeout {
                    url: url_text,
                    after,
                }),
                // A timeout set on the client itself; reqwest knows the limit.
                _ => Err(HttpError::Request {
                    url: url_text,
                    source,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use sprocket_core::{Scheduler, TaskMeta, TaskState};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bridge() -> HttpBridge {
        HttpBridge::new(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn binds_placeholders_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "New York"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-source", "mock")
                    .set_body_string("sunny"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = bridge()
            .get(
                &format!("{}/weather?q={{city}}", server.uri()),
                &[("city", "New York")],
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.text(), "sunny");
        assert_eq!(response.header("X-Source"), Some("mock"));
    }

    #[tokio::test]
    async fn posts_json_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/paste"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({ "text": "hello" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 9 })))
            .mount(&server)
            .await;

        let request = HttpRequest::post(format!("{}/paste", server.uri()))
            .json(&serde_json::json!({ "text": "hello" }))
            .unwrap();
        let response = bridge().request(request).await.unwrap();

        assert_eq!(response.status(), 201);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 9);
    }

    #[tokio::test]
    async fn template_errors_are_reported_before_sending() {
        let err = bridge()
            .request(HttpRequest::get("http://localhost/{missing}"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Template { .. }));

        let err = bridge()
            .request(HttpRequest::get("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn non_success_statuses_are_not_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = bridge()
            .request(HttpRequest::get(format!("{}/missing", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn client_timeout_without_a_limit_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let err = HttpBridge::with_client(client, None)
            .request(HttpRequest::get(format!("{}/slow", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Request { ref source, .. } if source.is_timeout()));
        assert!(!err.is_timeout());
    }

    /// One task issues a fast call and a call that times out, concurrently;
    /// a second task's slow call to the same endpoint still succeeds.
    #[tokio::test]
    async fn timeout_fails_only_the_timed_out_call() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(600)),
            )
            .mount(&server)
            .await;
        Mock::given(path("/fast"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("fast")
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let scheduler = Scheduler::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let template = format!("{}/{{endpoint}}", server.uri());

        let (http, log, url) = (bridge(), Arc::clone(&events), template.clone());
        let first = scheduler.spawn(TaskMeta::new("weather", "two calls"), async move {
            let slow = async {
                let result = http
                    .request(
                        HttpRequest::get(url.as_str())
                            .bind("endpoint", "slow")
                            .timeout(Duration::from_millis(300)),
                    )
                    .await;
                log.lock().push("first:slow");
                result
            };
            let fast = async {
                let result = http
                    .request(HttpRequest::get(url.as_str()).bind("endpoint", "fast"))
                    .await;
                log.lock().push("first:fast");
                result
            };
            let (slow, fast) = tokio::join!(slow, fast);
            assert!(slow.unwrap_err().is_timeout());
            assert_eq!(fast?.text(), "fast");
            Ok(())
        });

        let (http, log, url) = (bridge(), Arc::clone(&events), template);
        let second = scheduler.spawn(TaskMeta::new("weather", "one slow call"), async move {
            let response = http
                .request(HttpRequest::get(url.as_str()).bind("endpoint", "slow"))
                .await?;
            log.lock().push("second:slow");
            assert_eq!(response.text(), "slow");
            Ok(())
        });

        assert_eq!(
            second.wait_until(TaskState::is_suspended).await,
            TaskState::Suspended(SuspendReason::Http)
        );
        assert_eq!(first.wait().await, TaskState::Completed);
        assert_eq!(second.wait().await, TaskState::Completed);
        assert_eq!(
            *events.lock(),
            vec!["first:fast", "first:slow", "second:slow"]
        );
    }
}
