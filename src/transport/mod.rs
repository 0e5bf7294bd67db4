pub mod gateway;
pub mod http;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GatewayError, Result};

/// Outbound request descriptor. Kept around after the first attempt so the
/// refresh coordinator can replay it verbatim.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the backend base URL, e.g. `/movies`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a query parameter only when `value` is present.
    pub fn query_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| GatewayError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| GatewayError::InvalidRequest(format!("serialize json body: {e}")))?;
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Whether `path` names its own origin (`https://host/..`, `//host/..`)
    /// instead of a path under the backend base URL.
    pub fn is_absolute_url(&self) -> bool {
        self.path.starts_with("//") || reqwest::Url::parse(&self.path).is_ok()
    }

    /// Flag the request as a replay; a second auth failure then propagates.
    pub fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Fully-read backend response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Classify a non-2xx response for `request`.
    pub fn into_error(self, request: &ApiRequest) -> GatewayError {
        let body = self.text();
        if self.status == StatusCode::UNAUTHORIZED {
            GatewayError::AuthExpired {
                method: request.method.clone(),
                path: request.path.clone(),
                body,
            }
        } else {
            GatewayError::Status {
                method: request.method.clone(),
                path: request.path.clone(),
                status: self.status,
                body,
            }
        }
    }

    /// `Ok(self)` for 2xx, otherwise the classified error.
    pub fn error_for_status(self, request: &ApiRequest) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error(request))
        }
    }
}
