use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cine_gateway::{ApiRequest, CredentialStore, Gateway, GatewayError, SessionEvent};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const FRESH: &str = "fresh-access";

/// Backend that accepts exactly one access token and, while gated, holds
/// `/auth/refresh` open until the test adds a permit.
struct Backend {
    valid_token: Mutex<String>,
    refresh_ok: bool,
    refresh_calls: AtomicUsize,
    refresh_bodies: Mutex<Vec<Value>>,
    gate: Semaphore,
    served: Mutex<Vec<String>>,
}

impl Backend {
    fn new(refresh_ok: bool, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new("never-valid-yet".to_string()),
            refresh_ok,
            refresh_calls: AtomicUsize::new(0),
            refresh_bodies: Mutex::new(Vec::new()),
            gate: Semaphore::new(if gated { 0 } else { 64 }),
            served: Mutex::new(Vec::new()),
        })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn served(&self) -> Vec<String> {
        self.served.lock().unwrap().clone()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "token expired" })),
    )
        .into_response()
}

async fn item(
    State(backend): State<Arc<Backend>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    backend.served.lock().unwrap().push(name.clone());
    Json(json!({ "name": name })).into_response()
}

async fn missing(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::NOT_FOUND, Json(json!({ "message": "no such movie" }))).into_response()
}

async fn revoked() -> Response {
    unauthorized()
}

async fn login() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "bad credentials" })),
    )
        .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, body: Bytes) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        backend.refresh_bodies.lock().unwrap().push(value);
    }

    let _permit = backend.gate.acquire().await.unwrap();
    if !backend.refresh_ok {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "refresh token revoked" })),
        )
            .into_response();
    }
    *backend.valid_token.lock().unwrap() = FRESH.to_string();
    Json(json!({ "accessToken": FRESH })).into_response()
}

async fn spawn_backend(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/items/{name}", get(item))
        .route("/missing", get(missing))
        .route("/revoked", get(revoked))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn gateway_for(base_url: &str, refresh_token: Option<&str>) -> Gateway {
    let transport =
        cine_gateway::transport::http::HttpTransport::new(base_url, Duration::from_secs(5))
            .unwrap();
    let credentials = CredentialStore::in_memory();
    credentials.set_tokens(Some("stale-access"), refresh_token);
    Gateway::new(Arc::new(transport), credentials)
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fire one request per name, each only after the previous one is parked on
/// the refresh queue.
async fn park_in_order(
    gateway: &Gateway,
    names: &[&str],
) -> Vec<JoinHandle<cine_gateway::Result<Value>>> {
    let mut handles = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let gw = gateway.clone();
        let path = format!("/items/{name}");
        handles.push(tokio::spawn(async move { gw.get_json::<Value>(&path).await }));
        let coordinator = Arc::clone(gateway.coordinator());
        wait_until(move || coordinator.pending() == i + 1).await;
    }
    handles
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh_and_all_replay() {
    let backend = Backend::new(true, true);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));
    let mut events = gateway.subscribe();

    let handles = park_in_order(&gateway, &["a", "b", "c"]).await;
    assert!(gateway.coordinator().is_refreshing());
    assert_eq!(backend.refresh_calls(), 1);

    backend.gate.add_permits(1);

    for (handle, name) in handles.into_iter().zip(["a", "b", "c"]) {
        let value = handle.await.unwrap().unwrap();
        assert_eq!(value["name"], name);
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(
        backend.refresh_bodies.lock().unwrap().clone(),
        vec![json!({ "refreshToken": "refresh-1" })]
    );

    let mut served = backend.served();
    served.sort();
    assert_eq!(served, vec!["a", "b", "c"]);

    let creds = gateway.credentials();
    assert_eq!(creds.get_access_token().as_deref(), Some(FRESH));
    assert_eq!(creds.get_refresh_token().as_deref(), Some("refresh-1"));
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);
    assert!(!gateway.coordinator().is_refreshing());
    assert_eq!(gateway.coordinator().pending(), 0);
}

#[tokio::test]
async fn requests_after_refresh_use_new_token_directly() {
    let backend = Backend::new(true, false);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));

    let first: Value = gateway.get_json("/items/one").await.unwrap();
    assert_eq!(first["name"], "one");
    let second: Value = gateway.get_json("/items/two").await.unwrap();
    assert_eq!(second["name"], "two");

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(gateway.coordinator().episodes(), 1);
}

#[tokio::test]
async fn refresh_failure_rejects_everyone_and_ends_session_once() {
    let backend = Backend::new(false, true);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));
    let mut events = gateway.subscribe();

    let handles = park_in_order(&gateway, &["a", "b", "c"]).await;
    backend.gate.add_permits(1);

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_auth_expired(), "unexpected error: {err}");
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert!(backend.served().is_empty());
    assert!(gateway.credentials().get_access_token().is_none());
    assert!(gateway.credentials().get_refresh_token().is_none());
    assert_eq!(drain(&mut events), vec![SessionEvent::Ended]);
}

#[tokio::test]
async fn missing_refresh_token_ends_session_without_calling_backend() {
    let backend = Backend::new(true, false);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, None);
    let mut events = gateway.subscribe();

    let err = gateway.get_json::<Value>("/items/a").await.unwrap_err();
    assert!(err.is_auth_expired());
    assert_eq!(backend.refresh_calls(), 0);
    assert!(gateway.credentials().get_access_token().is_none());
    assert_eq!(drain(&mut events), vec![SessionEvent::Ended]);
}

#[tokio::test]
async fn auth_endpoint_401_is_returned_as_is() {
    let backend = Backend::new(true, false);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));

    let req = ApiRequest::post("/auth/login")
        .json(&json!({ "email": "ana@example.com", "password": "nope" }))
        .unwrap();
    let err = gateway.send(req).await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(err.message(), "bad credentials");
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(
        gateway.credentials().get_access_token().as_deref(),
        Some("stale-access")
    );
}

#[tokio::test]
async fn replayed_request_is_not_retried_twice() {
    let backend = Backend::new(true, false);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));

    let err = gateway.get_json::<Value>("/revoked").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(gateway.coordinator().episodes(), 1);
    assert_eq!(gateway.credentials().get_access_token().as_deref(), Some(FRESH));
}

#[tokio::test]
async fn replay_failure_reaches_only_its_caller() {
    let backend = Backend::new(true, true);
    let base = spawn_backend(Arc::clone(&backend)).await;
    let gateway = gateway_for(&base, Some("refresh-1"));

    let ok = park_in_order(&gateway, &["a"]).await;
    let gw = gateway.clone();
    let bad = tokio::spawn(async move { gw.get_json::<Value>("/missing").await });
    let coordinator = Arc::clone(gateway.coordinator());
    wait_until(move || coordinator.pending() == 2).await;

    backend.gate.add_permits(1);

    for handle in ok {
        assert_eq!(handle.await.unwrap().unwrap()["name"], "a");
    }
    match bad.await.unwrap() {
        Err(GatewayError::Status { status, .. }) => {
            assert_eq!(status, reqwest::StatusCode::NOT_FOUND)
        }
        other => panic!("expected 404, got {other:?}"),
    }
    assert_eq!(backend.refresh_calls(), 1);
}
