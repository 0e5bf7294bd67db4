//! Single-flight access-token refresh.
//!
//! A request that comes back 401 is parked as a [`PendingRequest`]. The first
//! one to park starts a refresh episode; everything that faults while the
//! episode is running joins the same queue instead of refreshing again. When
//! the episode resolves the queue is swapped out under the lock, so a fault
//! arriving after that point starts a fresh episode rather than being lost.
//!
//! On success the queued requests are replayed in arrival order with the new
//! token. On failure credentials are wiped, [`SessionEvent::Ended`] fires once,
//! and every waiter gets back the 401 it originally hit.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::security::audit_log::AuditLogger;
use crate::security::credential_store::CredentialStore;
use crate::security::request_signer::set_bearer;
use crate::transport::http::Transport;
use crate::transport::{ApiRequest, ApiResponse};

pub const REFRESH_PATH: &str = "/auth/refresh";

const AUTH_PATHS: [&str; 3] = ["/auth/login", "/auth/register", "/auth/refresh"];

/// Login, registration and refresh failures never go through the refresh flow.
/// Matches anywhere in the path so prefixed mounts (`/api/auth/login`) count.
pub fn is_auth_endpoint(path: &str) -> bool {
    AUTH_PATHS.iter().any(|p| path.contains(p))
}

/// Process-wide session signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh produced a new access token.
    Refreshed,
    /// Refresh failed; credentials are gone and the user must log in again.
    Ended,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// A caller parked until the current episode resolves.
struct PendingRequest {
    request: ApiRequest,
    original: GatewayError,
    reply: oneshot::Sender<Result<ApiResponse>>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    pending: VecDeque<PendingRequest>,
    episodes: u64,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
    audit: AuditLogger,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, credentials: CredentialStore) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            transport,
            credentials,
            state: Mutex::new(RefreshState::default()),
            events,
            audit: AuditLogger::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    /// Requests currently parked on the running episode.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of refresh episodes started so far.
    pub fn episodes(&self) -> u64 {
        self.lock().episodes
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Whether a failed attempt of `request` should enter the refresh flow.
    pub fn intercepts(request: &ApiRequest, error: &GatewayError) -> bool {
        error.is_auth_expired() && !request.is_retried() && !is_auth_endpoint(&request.path)
    }

    /// Park `request` (which failed with `original`) until the episode it
    /// joins resolves, starting one if none is running.
    ///
    /// Resolves with the replay's outcome after a successful refresh, or with
    /// `original` after a failed one.
    pub async fn recover(
        self: &Arc<Self>,
        mut request: ApiRequest,
        original: GatewayError,
    ) -> Result<ApiResponse> {
        request.mark_retried();
        let (reply, rx) = oneshot::channel();
        let method = request.method.clone();
        let path = request.path.clone();

        let started = {
            let mut state = self.lock();
            state.pending.push_back(PendingRequest {
                request,
                original,
                reply,
            });
            if state.in_flight {
                None
            } else {
                state.in_flight = true;
                state.episodes += 1;
                Some((state.episodes, state.pending.len()))
            }
        };

        match started {
            Some((episode, waiting)) => {
                self.audit.refresh_started(episode, waiting);
                // Detached so a caller dropping its future cannot strand the
                // rest of the queue.
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_episode(episode).await });
            }
            None => {
                debug!(method = %method, path = %path, "refresh in flight; request queued");
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::RefreshFailed {
                reason: "refresh episode dropped before completion".to_string(),
            }),
        }
    }

    async fn run_episode(self: Arc<Self>, episode: u64) {
        let outcome = self.refresh_access().await;

        let pending = {
            let mut state = self.lock();
            state.in_flight = false;
            mem::take(&mut state.pending)
        };

        match outcome {
            Ok(token) => {
                self.audit.refresh_succeeded(episode, pending.len());
                let _ = self.events.send(SessionEvent::Refreshed);

                // join_all polls in order, so replays are issued in arrival
                // order while still running concurrently.
                let replays = pending
                    .into_iter()
                    .map(|waiter| self.replay(episode, waiter, &token));
                join_all(replays).await;
            }
            Err(err) => {
                let reason = err.to_string();
                self.credentials.clear_all();
                self.audit.refresh_failed(episode, pending.len(), &reason);
                self.audit.session_ended(episode);
                let _ = self.events.send(SessionEvent::Ended);

                for waiter in pending {
                    let _ = waiter.reply.send(Err(waiter.original));
                }
            }
        }
    }

    async fn replay(&self, episode: u64, waiter: PendingRequest, token: &str) {
        let PendingRequest {
            mut request, reply, ..
        } = waiter;
        set_bearer(&mut request, token);

        let result = match self.transport.execute(&request).await {
            Ok(resp) => resp.error_for_status(&request),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            self.audit
                .replay_failed(episode, request.method.as_str(), &request.path, &err.to_string());
        }
        if reply.send(result).is_err() {
            debug!(path = %request.path, "caller went away before replay finished");
        }
    }

    /// One `POST /auth/refresh`. Only the access token is persisted; any
    /// refresh token in the answer is ignored.
    async fn refresh_access(&self) -> Result<String> {
        let refresh_token =
            self.credentials
                .get_refresh_token()
                .ok_or_else(|| GatewayError::RefreshFailed {
                    reason: "no refresh token stored".to_string(),
                })?;

        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;

        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|err| GatewayError::RefreshFailed {
                reason: format!("refresh call failed: {err}"),
            })?;

        if !response.is_success() {
            return Err(GatewayError::RefreshFailed {
                reason: format!("refresh rejected with status {}", response.status),
            });
        }

        let body: RefreshResponse = response.json().map_err(|err| GatewayError::RefreshFailed {
            reason: format!("unreadable refresh response: {err}"),
        })?;

        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::RefreshFailed {
                reason: "refresh response carried no accessToken".to_string(),
            })?;

        self.credentials.set_tokens(Some(&token), None);
        info!("access token refreshed");
        Ok(token)
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };
        if !state.pending.is_empty() {
            warn!(pending = state.pending.len(), "coordinator dropped with queued requests");
        }
    }
}
