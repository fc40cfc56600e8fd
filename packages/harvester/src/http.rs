//! HTTP plumbing shared by the retrieval pipeline and the SPARQL client.
//!
//! Requests go through a [`Transport`] (the real one wraps `reqwest`), a
//! per-client [`Throttle`] that spaces dispatches by the configured delay,
//! and [`HttpDispatcher::send_with_retry`] which retries transient failures
//! with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::{HarvesterError, Result};

/// HTTP statuses that are retried.
pub const TRANSIENT_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header, replacing any earlier header with the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    /// Value of a header, matched case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Final URL after redirects.
    pub url: String,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
            url: url.into(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `HttpStatus`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HarvesterError::HttpStatus {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// True when the content type (or, failing that, the magic bytes) says PDF.
    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"))
            || self.body.starts_with(b"%PDF")
    }
}

/// Failure below the HTTP status level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Connect failures and timeouts are retried; anything else is fatal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

/// Sends a single request. No retries, no throttling.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the configured per-attempt timeout.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client })
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
            url,
        })
    }
}

/// Spaces dispatches of one client by a fixed delay.
///
/// The lock is held while sleeping so that concurrent callers queue up
/// behind each other instead of all waking at the same instant.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl Throttle {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Wait until `delay` has passed since the previous dispatch, then
    /// record this dispatch.
    pub async fn wait(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.delay;
            if ready_at > Instant::now() {
                tracing::trace!(delay_ms = self.delay.as_millis() as u64, "Rate limiting");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Transport plus throttle: the single path every request of a client
/// takes.
#[derive(Debug)]
pub struct HttpDispatcher<T> {
    transport: T,
    throttle: Throttle,
}

impl<T: Transport> HttpDispatcher<T> {
    pub fn new(transport: T, request_delay: Duration) -> Self {
        Self {
            transport,
            throttle: Throttle::new(request_delay),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Dispatch a request, retrying transient failures.
    ///
    /// Transient failures are HTTP 500/502/503/504, connect errors and
    /// timeouts. Retry `n` (from 0) waits `policy.delay_for(n)`. Once
    /// `max_retries` retries are spent the call fails with
    /// `ServiceUnavailable` carrying the last status seen.
    ///
    /// Any other response, including 4xx, is returned as-is for the caller
    /// to interpret.
    pub async fn send_with_retry(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse> {
        let mut attempt: u32 = 0;
        let mut last_status: Option<u16> = None;

        loop {
            self.throttle.wait().await;
            tracing::debug!(url = %request.url, attempt = attempt + 1, "Dispatching request");

            let message = match self.transport.send(request).await {
                Ok(response) if TRANSIENT_STATUSES.contains(&response.status) => {
                    last_status = Some(response.status);
                    format!("Server error: {}", response.status)
                }
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => err.to_string(),
                Err(err) => {
                    return Err(HarvesterError::Http {
                        url: request.url.clone(),
                        message: err.to_string(),
                    });
                }
            };

            if attempt >= policy.max_retries {
                tracing::warn!(
                    url = %request.url,
                    attempts = attempt + 1,
                    status = ?last_status,
                    "Retries exhausted"
                );
                return Err(HarvesterError::ServiceUnavailable {
                    url: request.url.clone(),
                    attempts: attempt + 1,
                    status: last_status,
                    message,
                });
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                url = %request.url,
                error = %message,
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, will retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Decode a body as UTF-8, replacing invalid sequences.
pub fn bytes_to_string(bytes: &[u8], url: &str) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::warn!(url, error = %e, "Response is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted transport for unit tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    type Reply = std::result::Result<HttpResponse, TransportError>;

    struct Route {
        pattern: String,
        replies: VecDeque<Reply>,
    }

    /// Replies are picked by the first route whose pattern is a substring of
    /// the request URL (raw or percent-decoded). Each route plays its replies
    /// in order and repeats the last one. Unmatched URLs get a 404.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<Route>>,
        requests: Mutex<Vec<(HttpRequest, Instant)>>,
        latency: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, pattern: &str, replies: Vec<Reply>) -> Self {
            self.routes.lock().unwrap().push(Route {
                pattern: pattern.to_string(),
                replies: replies.into(),
            });
            self
        }

        pub fn html(self, pattern: &str, status: u16, body: &str) -> Self {
            let reply = HttpResponse::new(status, pattern, body.as_bytes().to_vec())
                .with_content_type("text/html; charset=utf-8");
            self.route(pattern, vec![Ok(reply)])
        }

        pub fn statuses(self, pattern: &str, statuses: &[u16], final_body: &str) -> Self {
            let replies = statuses
                .iter()
                .map(|s| {
                    Ok(HttpResponse::new(*s, pattern, final_body.as_bytes().to_vec())
                        .with_content_type("text/html"))
                })
                .collect();
            self.route(pattern, replies)
        }

        /// Every reply takes `latency` to arrive.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        /// Most requests ever awaiting a reply at the same time.
        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<(HttpRequest, Instant)> {
            self.requests.lock().unwrap().clone()
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests().into_iter().map(|(r, _)| r.url).collect()
        }
    }

    fn decoded(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let query: Vec<String> = parsed
                    .query_pairs()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                format!("{}{}?{}", parsed.origin().ascii_serialization(), parsed.path(), query.join("&"))
            }
            Err(_) => url.to_string(),
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &HttpRequest) -> Reply {
            self.requests
                .lock()
                .unwrap()
                .push((request.clone(), Instant::now()));

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let plain = decoded(&request.url);
            let mut routes = self.routes.lock().unwrap();
            let Some(route) = routes
                .iter_mut()
                .find(|r| request.url.contains(&r.pattern) || plain.contains(&r.pattern))
            else {
                return Ok(HttpResponse::new(404, request.url.clone(), Vec::new()));
            };

            let reply = if route.replies.len() > 1 {
                route.replies.pop_front()
            } else {
                route.replies.front().cloned()
            };
            match reply {
                Some(Ok(mut response)) => {
                    response.url = request.url.clone();
                    Ok(response)
                }
                Some(Err(e)) => Err(e),
                None => Ok(HttpResponse::new(404, request.url.clone(), Vec::new())),
            }
        }
    }

    /// SPARQL JSON results body. Values starting with `http` are typed `uri`.
    pub fn sparql_json(vars: &[&str], rows: &[&[(&str, &str)]]) -> HttpResponse {
        let bindings: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut binding = serde_json::Map::new();
                for (name, value) in row.iter() {
                    let kind = if value.starts_with("http") { "uri" } else { "literal" };
                    binding.insert(
                        (*name).to_string(),
                        serde_json::json!({ "type": kind, "value": value }),
                    );
                }
                serde_json::Value::Object(binding)
            })
            .collect();
        let body = serde_json::json!({
            "head": { "vars": vars },
            "results": { "bindings": bindings }
        });
        HttpResponse::new(200, "", body.to_string().into_bytes())
            .with_content_type("application/sparql-results+json")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockTransport;
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), 2.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_statuses_with_backoff() {
        let transport = MockTransport::new().statuses("/doc", &[503, 503, 200], "<p>ok</p>");
        let dispatcher = HttpDispatcher::new(transport, Duration::ZERO);

        let response = dispatcher
            .send_with_retry(&HttpRequest::new("https://x/doc"), &policy())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<p>ok</p>");

        let times: Vec<Instant> = dispatcher.transport().requests().iter().map(|(_, t)| *t).collect();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_last_status() {
        let transport = MockTransport::new().statuses("/doc", &[502], "");
        let dispatcher = HttpDispatcher::new(transport, Duration::ZERO);

        let err = dispatcher
            .send_with_retry(&HttpRequest::new("https://x/doc"), &policy())
            .await
            .unwrap_err();

        match err {
            HarvesterError::ServiceUnavailable {
                attempts, status, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(status, Some(502));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(dispatcher.transport().requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let transport = MockTransport::new().statuses("/doc", &[404], "");
        let dispatcher = HttpDispatcher::new(transport, Duration::ZERO);

        let response = dispatcher
            .send_with_retry(&HttpRequest::new("https://x/doc"), &policy())
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert!(response.error_for_status().is_err());
        assert_eq!(dispatcher.transport().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let transport = MockTransport::new().route(
            "/doc",
            vec![
                Err(TransportError::Timeout("slow".into())),
                Ok(HttpResponse::new(200, "", b"done".to_vec())),
            ],
        );
        let dispatcher = HttpDispatcher::new(transport, Duration::ZERO);

        let response = dispatcher
            .send_with_retry(&HttpRequest::new("https://x/doc"), &policy())
            .await
            .unwrap();
        assert_eq!(response.body, b"done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_transport_error_is_not_retried() {
        let transport = MockTransport::new()
            .route("/doc", vec![Err(TransportError::Other("bad url".into()))]);
        let dispatcher = HttpDispatcher::new(transport, Duration::ZERO);

        let err = dispatcher
            .send_with_retry(&HttpRequest::new("https://x/doc"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvesterError::Http { .. }));
        assert_eq!(dispatcher.transport().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_dispatches() {
        let transport = MockTransport::new().html("/a", 200, "a").html("/b", 200, "b");
        let dispatcher = HttpDispatcher::new(transport, Duration::from_millis(500));

        for url in ["https://x/a", "https://x/b", "https://x/a"] {
            dispatcher
                .send_with_retry(&HttpRequest::new(url), &RetryPolicy::none())
                .await
                .unwrap();
        }

        let times: Vec<Instant> = dispatcher.transport().requests().iter().map(|(_, t)| *t).collect();
        assert_eq!(times[1] - times[0], Duration::from_millis(500));
        assert_eq!(times[2] - times[1], Duration::from_millis(500));
    }

    #[test]
    fn test_request_header_replaces_same_name() {
        let request = HttpRequest::new("u")
            .header("Accept", "text/html")
            .header("accept", "application/json");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("ACCEPT"), Some("application/json"));
    }

    #[test]
    fn test_is_pdf() {
        assert!(HttpResponse::new(200, "u", b"%PDF-1.4".to_vec()).is_pdf());
        assert!(HttpResponse::new(200, "u", Vec::new())
            .with_content_type("application/pdf")
            .is_pdf());
        assert!(!HttpResponse::new(200, "u", b"<html>".to_vec()).is_pdf());
    }

    #[test]
    fn test_bytes_to_string_lossy() {
        assert_eq!(bytes_to_string(b"abc", "u"), "abc");
        assert_eq!(bytes_to_string(&[0x61, 0xff, 0x62], "u"), "a\u{fffd}b");
    }
}
