#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{
    data_uri,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, Request, RequestKind, Response},
};

/// Default per-attempt timeout applied on top of any request headers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed [`Net`] implementation.
///
/// Applies the request's retry policy: each attempt walks the URI failover
/// list in order, non-recoverable errors surface immediately, and the last
/// recoverable error is wrapped in `RetryExhausted` once attempts run out.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    request_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(REQUEST_TIMEOUT)
    }
}

impl HttpClient {
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized, which only happens
    /// on broken installs.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        let inner = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .expect("failed to build reqwest client");
        Self {
            inner,
            request_timeout,
        }
    }

    async fn attempt_uri(&self, request: &Request, uri: &str) -> NetResult<Response> {
        if uri.starts_with("data:") {
            let data = data_uri::decode(uri)?;
            return Ok(Response {
                data,
                uri: uri.to_string(),
                headers: Headers::new(),
            });
        }

        let url = Url::parse(uri).map_err(|_| NetError::UnsupportedScheme(uri.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(NetError::UnsupportedScheme(other.to_string())),
        }

        let mut req = self.inner.get(url).timeout(self.request_timeout);
        for (k, v) in request.headers.iter() {
            req = req.header(k, v);
        }
        if let Some(range) = request.byte_range {
            req = req.header("Range", range.to_header_value());
        }

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        if !(status.is_success() || status.as_u16() == 206) {
            let body = resp.text().await.ok();
            return Err(NetError::BadHttpStatus {
                status: status.as_u16(),
                url: uri.to_string(),
                body,
            });
        }

        let mut headers = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str(), v);
            }
        }

        let data = resp.bytes().await.map_err(NetError::from)?;
        Ok(Response {
            data,
            uri: uri.to_string(),
            headers,
        })
    }

    async fn attempt(&self, request: &Request) -> NetResult<Response> {
        let mut last_error = None;
        for uri in &request.uris {
            match self.attempt_uri(request, uri).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_recoverable() {
                        return Err(error);
                    }
                    debug!(uri = %uri, error = %error, "aulos-net: URI attempt failed, trying next");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetError::Http("no URIs in request".to_string())))
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn request(&self, kind: RequestKind, request: Request) -> NetResult<Response> {
        let max_retries = request.retry.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            let delay = request.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_recoverable() {
                        return Err(error);
                    }
                    warn!(
                        ?kind,
                        attempt,
                        max_retries,
                        error = %error,
                        "aulos-net: request attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(NetError::RetryExhausted {
            attempts: max_retries + 1,
            source: Box::new(last_error.unwrap_or(NetError::Timeout)),
        })
    }
}
