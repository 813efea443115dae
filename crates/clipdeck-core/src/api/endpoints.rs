//! Typed wrappers for the backend routes used by the dashboard.
//!
//! All of these go through [`ApiClient::request`], so they share token
//! attachment, rate-limit retries, and the global 401 policy.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use tracing::debug;

use super::{ApiClient, ApiError};
use crate::models::{
    Account, AccountCreated, ActionMessage, CreateAccountRequest, GenerateFromUrlRequest, Platform,
    PlatformCredentials, ReauthRequest, ReauthResult, TaskStarted, TaskStatus, UpdateAccountRequest,
};

/// Percent-encode a single path segment (platform, account, or task names)
fn segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn account_path(platform: &str, account: &str) -> String {
    format!("/platforms/{}/accounts/{}", segment(platform), segment(account))
}

impl ApiClient {
    /// List the configured platforms
    pub async fn list_platforms(&self) -> Result<Vec<Platform>, ApiError> {
        self.get("/platforms").await
    }

    /// Flip a platform's auto-upload flag
    pub async fn toggle_platform(&self, platform: &str) -> Result<serde_json::Value, ApiError> {
        self.post_empty(&format!("/platforms/{}/toggle", segment(platform)))
            .await
    }

    /// List the accounts configured for a platform
    pub async fn list_accounts(&self, platform: &str) -> Result<Vec<Account>, ApiError> {
        self.get(&format!("/platforms/{}/accounts", segment(platform)))
            .await
    }

    /// Create an account; the backend also runs the platform's authentication
    pub async fn create_account(
        &self,
        platform: &str,
        account: &CreateAccountRequest,
    ) -> Result<AccountCreated, ApiError> {
        self.post(&format!("/platforms/{}/accounts", segment(platform)), account)
            .await
    }

    /// Change the fields set in `update`
    pub async fn update_account(
        &self,
        platform: &str,
        account: &str,
        update: &UpdateAccountRequest,
    ) -> Result<ActionMessage, ApiError> {
        self.put(&account_path(platform, account), update).await
    }

    /// Delete an account together with its clip folder
    pub async fn delete_account(&self, platform: &str, account: &str) -> Result<ActionMessage, ApiError> {
        self.delete(&account_path(platform, account)).await
    }

    /// Re-run platform authentication for an existing account.
    /// With `use_existing_credentials` the stored credentials are reused and
    /// `credentials` only overrides what it sets.
    pub async fn reauth_account(
        &self,
        platform: &str,
        account: &str,
        credentials: PlatformCredentials,
        use_existing_credentials: bool,
    ) -> Result<ReauthResult, ApiError> {
        let body = ReauthRequest {
            name: account.to_string(),
            use_existing_credentials,
            credentials,
        };
        self.post(&format!("{}/reauth", account_path(platform, account)), &body)
            .await
    }

    /// Start clip generation from a video URL
    pub async fn generate_from_url(
        &self,
        platform: &str,
        account: &str,
        url: &str,
        mobile_format: bool,
    ) -> Result<TaskStarted, ApiError> {
        let body = GenerateFromUrlRequest {
            url: url.to_string(),
            mobile_format,
        };
        self.post(&format!("{}/generate-from-url", account_path(platform, account)), &body)
            .await
    }

    /// Upload a local video file and start clip generation from it
    pub async fn generate_from_file(
        &self,
        platform: &str,
        account: &str,
        file: &Path,
        mobile_format: bool,
    ) -> Result<TaskStarted, ApiError> {
        let bytes = tokio::fs::read(file).await.map_err(|e| {
            ApiError::InvalidRequest(format!("Failed to read {}: {}", file.display(), e))
        })?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        debug!(file = %file_name, size = bytes.len(), "Uploading video for clip generation");

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("file", part)
            .text("mobile_format", mobile_format.to_string());

        self.post_multipart(&format!("{}/generate-from-file", account_path(platform, account)), form)
            .await
    }

    /// Start uploading generated clips for an account
    pub async fn start_upload(&self, platform: &str, account: &str) -> Result<TaskStarted, ApiError> {
        self.post_empty(&format!("{}/upload", account_path(platform, account)))
            .await
    }

    /// Fetch the status of a background task
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError> {
        self.get(&format!("/tasks/{}", segment(task_id))).await
    }

    /// Fetch the backend's application configuration
    pub async fn get_config(&self) -> Result<serde_json::Value, ApiError> {
        self.get("/config").await
    }

    /// Replace the backend's application configuration
    pub async fn save_config(&self, config: &serde_json::Value) -> Result<ActionMessage, ApiError> {
        self.post("/config", config).await
    }
}
