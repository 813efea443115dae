//! In-process mock of the clipdeck backend for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use clipdeck_core::auth::{MemoryTokenStore, SessionSettings};
use clipdeck_core::{ApiClient, SessionManager};

pub const PASSWORD: &str = "secret";

/// How `/auth/verify` answers
#[derive(Debug, Clone)]
pub enum VerifyMode {
    Accept { user: String, rotate_to: Option<String> },
    /// Valid session whose token has no subject: `{"valid": true, "user": null}`
    AcceptWithoutUser,
    /// `{"valid": false}` with a 200 status
    Invalid,
    Reject,
    Fail,
    SlowAccept { delay: Duration, user: String, rotate_to: Option<String> },
}

pub struct MockState {
    pub login_token: Mutex<String>,
    pub verify_mode: Mutex<VerifyMode>,
    pub verify_calls: AtomicUsize,
    pub verify_auth: Mutex<Vec<Option<String>>>,
    pub rate_limited_remaining: AtomicUsize,
    pub limited_hits: AtomicUsize,
    pub task_polls: AtomicUsize,
    /// Accounts keyed by (platform, account name)
    pub accounts: Mutex<BTreeMap<(String, String), Value>>,
    pub backend_config: Mutex<Value>,
    pub last_reauth: Mutex<Option<Value>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            login_token: Mutex::new(token_expiring_in(3 * 3600)),
            verify_mode: Mutex::new(VerifyMode::Accept {
                user: "alice".to_string(),
                rotate_to: None,
            }),
            verify_calls: AtomicUsize::new(0),
            verify_auth: Mutex::new(Vec::new()),
            rate_limited_remaining: AtomicUsize::new(0),
            limited_hits: AtomicUsize::new(0),
            task_polls: AtomicUsize::new(0),
            accounts: Mutex::new(BTreeMap::new()),
            backend_config: Mutex::new(json!({"YouTube": {"auto_upload": false, "accounts": {}}})),
            last_reauth: Mutex::new(None),
        }
    }
}

impl MockState {
    pub fn set_verify_mode(&self, mode: VerifyMode) {
        *self.verify_mode.lock().expect("lock") = mode;
    }

    pub fn set_login_token(&self, token: &str) {
        *self.login_token.lock().expect("lock") = token.to_string();
    }

    pub fn login_token(&self) -> String {
        self.login_token.lock().expect("lock").clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn set_rate_limited(&self, count: usize) {
        self.rate_limited_remaining.store(count, Ordering::SeqCst);
    }

    pub fn limited_hits(&self) -> usize {
        self.limited_hits.load(Ordering::SeqCst)
    }

    pub fn account(&self, platform: &str, name: &str) -> Option<Value> {
        self.accounts
            .lock()
            .expect("lock")
            .get(&(platform.to_string(), name.to_string()))
            .cloned()
    }

    /// Answer 429 while the rate-limit budget lasts
    fn take_rate_limit(&self) -> bool {
        self.limited_hits.fetch_add(1, Ordering::SeqCst);
        self.rate_limited_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/verify", get(verify))
            .route("/api/whoami", get(whoami))
            .route("/api/echo", get(echo))
            .route("/api/protected", get(protected))
            .route("/api/slow-protected", get(slow_protected))
            .route("/api/limited", get(limited))
            .route("/api/empty", get(empty))
            .route("/api/config", get(get_config).post(save_config))
            .route("/api/tasks/{task_id}", get(task_status))
            .route("/api/platforms/{platform}/accounts", get(list_accounts).post(create_account))
            .route(
                "/api/platforms/{platform}/accounts/{account}",
                put(update_account).delete(delete_account),
            )
            .route("/api/platforms/{platform}/accounts/{account}/reauth", post(reauth_account))
            .route(
                "/api/platforms/{platform}/accounts/{account}/generate-from-file",
                post(generate_from_file),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock backend");
        });

        Self {
            base_url: format!("http://{}/api", addr),
            state,
            task,
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.base_url).expect("client")
    }

    pub fn manager(&self, store: Arc<MemoryTokenStore>) -> SessionManager {
        SessionManager::new(self.client(), store, SessionSettings::default())
    }
}

/// Base URL of a port nothing listens on
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}/api", addr)
}

/// Unsigned JWT-shaped token whose `exp` is `secs` from now
pub fn token_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"alice","exp":{}}}"#, exp));
    format!("{}.{}.sig{}", header, payload, secs)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Could not validate credentials"})),
    )
        .into_response()
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    match username {
        "nodetail" => return StatusCode::UNAUTHORIZED.into_response(),
        "nulldetail" => return (StatusCode::UNAUTHORIZED, Json(json!({"detail": null}))).into_response(),
        "servererror" => return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
        _ => {}
    }
    if password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid credentials"})),
        )
            .into_response();
    }
    Json(json!({"access_token": state.login_token(), "token_type": "bearer"})).into_response()
}

async fn verify(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.verify_calls.fetch_add(1, Ordering::SeqCst);
    let auth = bearer(&headers);
    state.verify_auth.lock().expect("lock").push(auth.clone());
    if auth.is_none() {
        return unauthorized();
    }

    let mode = state.verify_mode.lock().expect("lock").clone();
    match mode {
        VerifyMode::Accept { user, rotate_to } => {
            Json(json!({"valid": true, "user": user, "token": rotate_to})).into_response()
        }
        VerifyMode::AcceptWithoutUser => Json(json!({"valid": true, "user": null})).into_response(),
        VerifyMode::Invalid => Json(json!({"valid": false, "user": null})).into_response(),
        VerifyMode::Reject => unauthorized(),
        VerifyMode::Fail => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        VerifyMode::SlowAccept { delay, user, rotate_to } => {
            tokio::time::sleep(delay).await;
            Json(json!({"valid": true, "user": user, "token": rotate_to})).into_response()
        }
    }
}

async fn whoami(headers: HeaderMap) -> Json<Value> {
    Json(json!({ "token": bearer(&headers) }))
}

async fn echo(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let client = headers
        .get("x-client")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({ "query": query, "client": client }))
}

async fn protected() -> Response {
    unauthorized()
}

async fn slow_protected() -> Response {
    tokio::time::sleep(Duration::from_millis(300)).await;
    unauthorized()
}

async fn limited(State(state): State<Arc<MockState>>) -> Response {
    if state.take_rate_limit() {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    Json(json!({"ok": true})).into_response()
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn get_config(State(state): State<Arc<MockState>>) -> Json<Value> {
    Json(state.backend_config.lock().expect("lock").clone())
}

async fn save_config(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    *state.backend_config.lock().expect("lock") = body;
    Json(json!({"message": "Configuration saved successfully"}))
}

fn account_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Account not found"}))).into_response()
}

async fn list_accounts(State(state): State<Arc<MockState>>, Path(platform): Path<String>) -> Json<Value> {
    let accounts: Vec<Value> = state
        .accounts
        .lock()
        .expect("lock")
        .iter()
        .filter(|((p, _), _)| *p == platform)
        .map(|(_, account)| account.clone())
        .collect();
    Json(Value::Array(accounts))
}

async fn create_account(
    State(state): State<Arc<MockState>>,
    Path(platform): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(name) = body["name"].as_str().map(str::to_string) else {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "name required"}))).into_response();
    };
    let authenticated = body.get("client_key").is_some();
    let account = json!({
        "name": name,
        "active": body["active"].as_bool().unwrap_or(true),
        "authenticated": authenticated,
        "clip_folder": format!("{}_automation/account_clips/{}", platform.to_lowercase(), name),
        "description": body["description"].as_str().unwrap_or_default(),
        "tags": body["tags"].as_str().unwrap_or_default(),
        "title": body["title"].as_str().unwrap_or_default(),
        "category_id": body["category_id"].as_str().unwrap_or_default(),
        "clip_duration": body["clip_duration"].as_u64().unwrap_or(57),
        "schedule": {},
    });
    state.accounts.lock().expect("lock").insert((platform, name.clone()), account);
    let auth_message = if authenticated { "" } else { "Missing client credentials" };
    Json(json!({
        "message": format!("Account {} created successfully", name),
        "authenticated": authenticated,
        "auth_message": auth_message,
    }))
    .into_response()
}

async fn update_account(
    State(state): State<Arc<MockState>>,
    Path((platform, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut accounts = state.accounts.lock().expect("lock");
    let Some(account) = accounts.get_mut(&(platform, name.clone())) else {
        return account_not_found();
    };
    if let (Some(target), Some(changes)) = (account.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(json!({"message": format!("Account {} updated successfully", name)})).into_response()
}

async fn delete_account(
    State(state): State<Arc<MockState>>,
    Path((platform, name)): Path<(String, String)>,
) -> Response {
    match state.accounts.lock().expect("lock").remove(&(platform, name.clone())) {
        Some(_) => Json(json!({"message": format!("Account {} deleted successfully", name)})).into_response(),
        None => account_not_found(),
    }
}

async fn reauth_account(
    State(state): State<Arc<MockState>>,
    Path((platform, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if state.account(&platform, &name).is_none() {
        return account_not_found();
    }
    *state.last_reauth.lock().expect("lock") = Some(body);
    Json(json!({
        "success": true,
        "authenticated": true,
        "auth_message": "Authenticated",
        "message": "Re-authentication successful",
    }))
    .into_response()
}

async fn task_status(State(state): State<Arc<MockState>>, Path(task_id): Path<String>) -> Response {
    if task_id != "clip-1" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Task not found"}))).into_response();
    }
    let polls = state.task_polls.fetch_add(1, Ordering::SeqCst) + 1;
    if polls >= 3 {
        Json(json!({"status": "completed", "progress": 100, "message": "Generated 4 clips"})).into_response()
    } else {
        Json(json!({"status": "processing", "progress": polls * 30, "message": "Cutting clips"})).into_response()
    }
}

async fn generate_from_file(
    State(state): State<Arc<MockState>>,
    Path((platform, account)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.take_rate_limit() {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(json!({"detail": "expected multipart"}))).into_response();
    }
    let text = String::from_utf8_lossy(&body);
    if !text.contains("filename=\"stream.mp4\"") || !text.contains("FAKEVIDEO") {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "file part missing"}))).into_response();
    }
    Json(json!({"task_id": format!("{}_{}_1", platform, account), "message": "Clip generation started"}))
        .into_response()
}
