use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::security::credential_store::CredentialStore;
use crate::security::request_signer;
use crate::security::storage::{FileStore, MemoryStore};
use crate::security::token_refresh::{RefreshCoordinator, SessionEvent};
use crate::transport::http::{HttpTransport, Transport};
use crate::transport::{ApiRequest, ApiResponse};

/// Authenticated entry point for every backend call.
///
/// Cheap to clone; clones share credentials and the refresh coordinator.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    coordinator: Arc<RefreshCoordinator>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, credentials: CredentialStore) -> Self {
        let coordinator = RefreshCoordinator::new(Arc::clone(&transport), credentials.clone());
        Self {
            transport,
            credentials,
            coordinator,
        }
    }

    /// Gateway over HTTP with credentials persisted at `config.storage_path`.
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.timeout())?;
        let durable = FileStore::open(&config.storage_path)?;
        let credentials = CredentialStore::new(
            Arc::new(durable),
            Arc::new(MemoryStore::new()),
            config.legacy_keys.clone(),
        );
        Ok(Self::new(Arc::new(transport), credentials))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Session signals: `Refreshed` after a successful refresh, `Ended` when
    /// the session was torn down.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    /// Sign, send, and on a first 401 hand the request to the refresh
    /// coordinator. Non-2xx answers come back as errors.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        // Tokens only ever go to the configured backend.
        if request.is_absolute_url() {
            return Err(GatewayError::InvalidRequest(format!(
                "absolute URL not allowed: {}",
                request.path
            )));
        }
        request_signer::sign(&mut request, &self.credentials);

        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let error = response.into_error(&request);
        if !RefreshCoordinator::intercepts(&request, &error) {
            return Err(error);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            "access token rejected; waiting on refresh"
        );
        self.coordinator.recover(request, error).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.json()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }
}
