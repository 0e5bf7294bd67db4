use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{GatewayError, Result};
use crate::transport::{ApiRequest, ApiResponse};

/// Sends a request and returns the backend's answer whatever its status.
/// Only transport-level failures are errors here.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport bound to one backend base URL. Request paths
/// always resolve under that URL; nothing is sent to another origin.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Always ends with `/` so joins keep the base path.
    base: Url,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| GatewayError::InvalidRequest(format!("base url {base_url}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        debug!(base_url = %base, timeout_secs = timeout.as_secs(), "http transport ready");

        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Resolve `path` against the base URL. Absolute URLs and paths that
    /// climb out of the base path are rejected.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| GatewayError::InvalidRequest(format!("request path {path}: {e}")))?;

        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            return Err(GatewayError::InvalidRequest(format!(
                "request path {path} resolves outside {}",
                self.base
            )));
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(&request.path)?;

        trace!(
            method = %request.method,
            url = %url,
            retried = request.is_retried(),
            "sending request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        debug!(
            method = %request.method,
            path = %request.path,
            status_code = %status.as_u16(),
            "received response"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
