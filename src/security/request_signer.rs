use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::security::credential_store::CredentialStore;
use crate::transport::ApiRequest;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub fn bearer_value(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {token}")).ok()
}

/// Replace the request's Authorization header with `token`.
/// Returns false when the token cannot be carried in a header.
pub fn set_bearer(request: &mut ApiRequest, token: &str) -> bool {
    match bearer_value(token) {
        Some(value) => {
            request.headers.insert(AUTHORIZATION, value);
            true
        }
        None => {
            warn!(path = %request.path, "access token is not a valid header value; sending unsigned");
            false
        }
    }
}

/// Attach `Authorization: Bearer <access>` when a token is stored and make
/// sure the request carries an `X-Request-Id` that survives replays.
pub fn sign(request: &mut ApiRequest, credentials: &CredentialStore) {
    if !request.headers.contains_key(&REQUEST_ID_HEADER) {
        if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            request.headers.insert(REQUEST_ID_HEADER, id);
        }
    }

    match credentials.get_access_token() {
        Some(token) => {
            let signed = set_bearer(request, &token);
            trace!(method = %request.method, path = %request.path, signed, "request signed");
        }
        None => {
            trace!(method = %request.method, path = %request.path, "no access token; sending unsigned");
        }
    }
}
