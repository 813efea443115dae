//! Wire types exchanged with the clipdeck backend.
//!
//! With the `ts` feature enabled these also export TypeScript bindings, so a
//! browser front end can share the same shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Response of `GET /auth/verify`. `token` is present only when the backend
/// rotates the session token.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct VerifyResponse {
    /// Token subject; `null` when the token carries no `sub`
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub token: Option<String>,
}

// ============================================================================
// Platforms and accounts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Platform {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    /// Auto-upload enabled for this platform
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub account_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub clip_folder: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub clip_duration: u32,
    /// Upload times per weekday
    #[serde(default)]
    pub schedule: BTreeMap<String, Vec<String>>,
}

/// Platform API credentials sent when an account is created or re-authenticated.
/// Each platform reads only its own fields.
#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct PlatformCredentials {
    /// YouTube OAuth client secrets (JSON file contents)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secrets_content: Option<String>,
    /// TikTok
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Instagram
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Twitter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_secret: Option<String>,
}

impl PlatformCredentials {
    /// Set a credential by its wire name. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = match name {
            "client_secrets_content" => &mut self.client_secrets_content,
            "client_key" => &mut self.client_key,
            "client_secret" => &mut self.client_secret,
            "access_token" => &mut self.access_token,
            "api_key" => &mut self.api_key,
            "api_secret" => &mut self.api_secret,
            "access_token_key" => &mut self.access_token_key,
            "access_token_secret" => &mut self.access_token_secret,
            _ => return false,
        };
        *slot = Some(value.into());
        true
    }
}

/// Body of `POST /platforms/{platform}/accounts`
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct CreateAccountRequest {
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_duration: Option<u32>,
    #[serde(flatten)]
    pub credentials: PlatformCredentials,
}

impl CreateAccountRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            description: None,
            tags: None,
            title: None,
            category_id: None,
            clip_duration: None,
            credentials: PlatformCredentials::default(),
        }
    }
}

/// Body of `PUT /platforms/{platform}/accounts/{account}`.
/// Only the fields that are set are changed.
#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct UpdateAccountRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<BTreeMap<String, Vec<String>>>,
}

impl UpdateAccountRequest {
    pub fn is_empty(&self) -> bool {
        self.active.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.title.is_none()
            && self.category_id.is_none()
            && self.clip_duration.is_none()
            && self.schedule.is_none()
    }
}

/// Body of `POST /platforms/{platform}/accounts/{account}/reauth`
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct ReauthRequest {
    pub name: String,
    /// Reuse the credentials already stored for the account
    pub use_existing_credentials: bool,
    #[serde(flatten)]
    pub credentials: PlatformCredentials,
}

/// Result of creating an account. Platform authentication may fail while the
/// account itself is still created.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct AccountCreated {
    pub message: String,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub auth_message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct ReauthResult {
    pub success: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub auth_message: String,
    #[serde(default)]
    pub message: String,
}

/// Plain `{"message": ...}` acknowledgement
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct ActionMessage {
    #[serde(default)]
    pub message: String,
}

/// Body of `POST .../generate-from-url`
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct GenerateFromUrlRequest {
    pub url: String,
    pub mobile_format: bool,
}

// ============================================================================
// Background tasks
// ============================================================================

/// Acknowledgement returned when the backend starts a background task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct TaskStarted {
    pub task_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
}
