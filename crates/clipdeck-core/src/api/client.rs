//! Authenticated request pipeline for the clipdeck backend.
//!
//! Every call goes through [`ApiClient::request`], which attaches the installed
//! bearer token, merges per-call options, retries rate-limited requests, and
//! runs the global 401 policy before handing the error back to the caller.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{multipart, Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when nothing is configured (local development backend)
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// HTTP request timeout in seconds.
/// Clip generation requests return a task id immediately, so 30s is plenty.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Reaction to a 401 from any request issued through the pipeline.
///
/// `token` is the credential the failing request carried (`None` for
/// anonymous requests), so the handler can tell a stale credential from the
/// one currently installed.
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self, token: Option<&str>);
}

/// Body of an outbound request
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// Multipart form, used for file uploads. Not retried on 429.
    Multipart(multipart::Form),
}

impl RequestBody {
    /// Serialize any value into a JSON body
    pub fn json<B: Serialize + ?Sized>(body: &B) -> Result<Self, ApiError> {
        serde_json::to_value(body)
            .map(RequestBody::Json)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))
    }

    /// Copy of the body for a retry, if the body can be rebuilt
    fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Json(v) => Some(RequestBody::Json(v.clone())),
            RequestBody::Multipart(_) => None,
        }
    }
}

/// Per-call options merged on top of the client's defaults
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Send without the installed credential (login)
    pub anonymous: bool,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// State shared by every clone of a client
#[derive(Default)]
struct Shared {
    token: RwLock<Option<String>>,
    unauthorized: RwLock<Option<Arc<dyn UnauthorizedHandler>>>,
}

/// API client for the clipdeck backend.
/// Clone is cheap and clones share the installed token and 401 handler.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token().is_some())
            .finish()
    }
}

impl ApiClient {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            shared: Arc::new(Shared::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Install or clear the default bearer credential.
    /// Requests built after this call use the new value; in-flight requests keep theirs.
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut slot = self
            .shared
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token;
    }

    /// Currently installed bearer credential
    pub fn token(&self) -> Option<String> {
        self.shared
            .token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Register the global reaction to 401 responses
    pub fn set_unauthorized_handler(&self, handler: Arc<dyn UnauthorizedHandler>) {
        let mut slot = self
            .shared
            .unauthorized
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(handler);
    }

    fn notify_unauthorized(&self, token: Option<&str>) {
        let handler = self
            .shared
            .unauthorized
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match handler {
            Some(handler) => handler.on_unauthorized(token),
            None => debug!("401 received with no unauthorized handler registered"),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Issue a request and parse the JSON response body.
    ///
    /// An empty success body parses as JSON `null`, so `()` and `Option<T>`
    /// work as response types for endpoints that return nothing.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let token = if options.anonymous { None } else { self.token() };
        let caller_auth = options.headers.contains_key(header::AUTHORIZATION);

        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut pending = Some(body);

        loop {
            let Some(body) = pending.take() else {
                return Err(ApiError::RateLimited);
            };
            pending = body.try_clone();

            let mut builder = self
                .client
                .request(method.clone(), &url)
                .headers(options.headers.clone());
            if !options.query.is_empty() {
                builder = builder.query(&options.query);
            }
            if !caller_auth {
                if let Some(token) = token.as_deref() {
                    builder = builder.bearer_auth(token);
                }
            }
            if let Some(timeout) = options.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match body {
                RequestBody::Empty => builder,
                RequestBody::Json(ref value) => builder.json(value),
                RequestBody::Multipart(form) => builder.multipart(form),
            };

            debug!(method = %method, url = %url, authenticated = token.is_some(), "Sending request");
            let response = builder.send().await.map_err(|e| {
                warn!(method = %method, url = %url, error = %e, "Request failed");
                ApiError::Network(e)
            })?;

            let status = response.status();
            if status.is_success() {
                return Self::parse_body(response, &url).await;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES || pending.is_none() {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            let err = ApiError::from_status(status, &text);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                warn!(method = %method, url = %url, "Request rejected with 401");
                self.notify_unauthorized(token.as_deref());
            } else {
                debug!(method = %method, url = %url, status = status.as_u16(), "Request returned error status");
            }
            return Err(err);
        }
    }

    async fn parse_body<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to read body from {}: {}", url, e)))?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))
    }

    // ===== Convenience wrappers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, RequestBody::Empty, RequestOptions::default())
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestBody::json(body)?, RequestOptions::default())
            .await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestBody::Empty, RequestOptions::default())
            .await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestBody::Multipart(form), RequestOptions::default())
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, RequestBody::json(body)?, RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, RequestBody::Empty, RequestOptions::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let api = ApiClient::new("http://localhost:8000/api/").expect("client");
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert_eq!(api.url("/auth/verify"), "http://localhost:8000/api/auth/verify");
        assert_eq!(api.url("tasks/42"), "http://localhost:8000/api/tasks/42");
        assert_eq!(api.url("https://cdn.example.com/x"), "https://cdn.example.com/x");
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let api = ApiClient::new(DEFAULT_BASE_URL).expect("client");
        let other = api.clone();
        api.set_auth_token(Some("abc".to_string()));
        assert_eq!(other.token().as_deref(), Some("abc"));
        other.set_auth_token(None);
        assert_eq!(api.token(), None);
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let api = ApiClient::new(DEFAULT_BASE_URL).expect("client");
        api.set_auth_token(Some("secret-token-value".to_string()));
        let printed = format!("{:?}", api);
        assert!(!printed.contains("secret-token-value"));
        assert!(printed.contains("has_token: true"));
    }

    #[test]
    fn test_request_options_builder() {
        let opts = RequestOptions::new()
            .query("page", "2")
            .header(HeaderName::from_static("x-trace"), HeaderValue::from_static("t1"))
            .anonymous();
        assert!(opts.anonymous);
        assert_eq!(opts.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(opts.headers.get("x-trace").map(|v| v.as_bytes()), Some(&b"t1"[..]));
    }

    #[test]
    fn test_multipart_body_is_not_retryable() {
        assert!(RequestBody::Empty.try_clone().is_some());
        assert!(RequestBody::Json(serde_json::json!({"a": 1})).try_clone().is_some());
        assert!(RequestBody::Multipart(multipart::Form::new()).try_clone().is_none());
    }
}
