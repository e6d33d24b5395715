//! The transport collaborator: sends a fully built request and yields one response.
//!
//! [`Transport`] is the seam between the declarative core and the network. The crate
//! ships [`ReqwestTransport`], which owns connection pooling, timeouts and the retry
//! policy; tests and special deployments can plug in their own implementation through
//! [`ClientBuilder::transport`](crate::ClientBuilder::transport).

use crate::error::{Error, Result, TransportError};
use crate::retry::{RetryPredicate, RetryStrategy};
use futures::future::{BoxFuture, FutureExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// A request as handed to the transport: verb, path and query, headers, body bytes.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Path and query string relative to the transport's base URL, starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// An undecoded response.
///
/// Feature executors and passthrough handlers produce `RawResponse`s too; they are
/// decoded exactly like responses coming from the network.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    /// Time from the first attempt until this response was received.
    pub latency: Duration,
    /// Number of attempts the transport made.
    pub attempts: usize,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            latency: Duration::ZERO,
            attempts: 1,
        }
    }

    /// A `200 OK` response carrying `value` as JSON.
    ///
    /// ```
    /// use declaro::RawResponse;
    ///
    /// let stub = RawResponse::json(serde_json::json!({ "id": 7 }));
    /// assert_eq!(stub.body, r#"{"id":7}"#);
    /// assert_eq!(stub.headers["content-type"], "application/json");
    /// ```
    pub fn json(value: serde_json::Value) -> Self {
        Self::new(StatusCode::OK, value.to_string())
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    pub fn with_header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(crate) fn into_http_error(self) -> TransportError {
        TransportError::HttpError {
            status: self.status,
            raw_response: self.body,
            headers: self.headers,
        }
    }
}

/// Sends requests.
///
/// Implementations decide everything connection-related: pooling, TLS, timeouts,
/// retries. The returned future resolves exactly once.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, std::result::Result<RawResponse, TransportError>>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
///
/// Non-2xx responses are reported as [`TransportError::HttpError`]. Failed attempts
/// are retried according to the configured [`RetryStrategy`] and [`RetryPredicate`].
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<ReqwestInner>,
}

struct ReqwestInner {
    http_client: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    retry_predicate: Box<dyn RetryPredicate>,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    pub(crate) fn new(
        base_url: Url,
        default_headers: HeaderMap,
        retry_strategy: RetryStrategy,
        retry_predicate: Box<dyn RetryPredicate>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            inner: Arc::new(ReqwestInner {
                http_client,
                base_url,
                default_headers,
                retry_strategy,
                retry_predicate,
                timeout,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }
}

impl Transport for ReqwestTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, std::result::Result<RawResponse, TransportError>> {
        let inner = self.inner.clone();
        async move { inner.execute(request).await }.boxed()
    }
}

impl ReqwestInner {
    fn url_for(&self, path_and_query: &str) -> std::result::Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, path_and_query))?)
    }

    async fn execute(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path_and_query)?;
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.send_once(&url, &request, attempt).await {
                Ok(mut response) if response.is_success() => {
                    response.latency = start_time.elapsed();
                    return Ok(response);
                }
                Ok(response) => response.into_http_error(),
                Err(e) => e,
            };

            if !self.retry_predicate.should_retry(&error, attempt) {
                return Err(error);
            }

            match self.retry_strategy.delay_for_attempt(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        error = %error,
                        attempt = attempt,
                        method = %request.method,
                        url = %url,
                        "Request attempt failed"
                    );
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = attempt,
                        "Retrying request after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                None if attempt == 1 => return Err(error),
                None => {
                    return Err(TransportError::MaxRetriesExceeded {
                        attempts: attempt,
                        last_error: Box::new(error),
                    })
                }
            }
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        request: &TransportRequest,
        attempt: usize,
    ) -> std::result::Result<RawResponse, TransportError> {
        tracing::debug!(
            method = %request.method,
            url = %url,
            attempt = attempt,
            "Executing HTTP request"
        );

        let mut builder = self
            .http_client
            .request(request.method.clone(), url.clone());

        for (name, value) in &self.default_headers {
            builder = builder.header(name, value);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify)?;

        Ok(RawResponse {
            status,
            headers,
            body,
            latency: Duration::ZERO,
            attempts: attempt,
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryOnRetryable;

    fn transport(base: &str) -> ReqwestTransport {
        ReqwestTransport::new(
            Url::parse(base).unwrap(),
            HeaderMap::new(),
            RetryStrategy::None,
            Box::new(RetryOnRetryable),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_url_keeps_base_path() {
        let with_path = transport("https://api.example.com/v2/");
        assert_eq!(
            with_path.inner.url_for("/items/42?filter=active").unwrap().as_str(),
            "https://api.example.com/v2/items/42?filter=active"
        );

        let bare = transport("https://api.example.com");
        assert_eq!(
            bare.inner.url_for("/items").unwrap().as_str(),
            "https://api.example.com/items"
        );
    }

    #[test]
    fn test_non_success_becomes_http_error() {
        let error = RawResponse::new(StatusCode::NOT_FOUND, "missing").into_http_error();
        assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(error.raw_response(), Some("missing"));
    }
}
