use reqwest::{Method, StatusCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failures surfaced by the gateway and the typed API clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend rejected the access token (HTTP 401).
    #[error("access token rejected: {method} {path}")]
    AuthExpired {
        method: Method,
        path: String,
        body: String,
    },

    /// No usable access token could be obtained from `/auth/refresh`.
    #[error("token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    /// Any other non-2xx response. Replayed requests that fail for reasons
    /// unrelated to authentication surface here unchanged.
    #[error("{method} {path} failed with status {status}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, GatewayError::AuthExpired { .. })
    }

    /// HTTP status carried by the error, if the backend answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::AuthExpired { .. } => Some(StatusCode::UNAUTHORIZED),
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Network(err) => err.status(),
            _ => None,
        }
    }

    /// Backend-provided `{"message": "..."}` text, falling back to the
    /// error's own description.
    pub fn message(&self) -> String {
        let body = match self {
            GatewayError::AuthExpired { body, .. } | GatewayError::Status { body, .. } => {
                Some(body.as_str())
            }
            _ => None,
        };

        body.and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| self.to_string())
    }
}
