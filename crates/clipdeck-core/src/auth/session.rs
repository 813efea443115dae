//! Session lifecycle: login, verification, silent refresh, and logout.
//!
//! `SessionManager` is the single owner of the session token. It mirrors the
//! token into the shared [`ApiClient`], publishes the session state through a
//! watch channel, and registers itself as the client's 401 handler.
//!
//! Every transition bumps a session epoch. Async operations capture the epoch
//! before they await and drop their result if it changed in the meantime, so a
//! verify or refresh that resolves after `logout()` cannot bring the session
//! back.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::claims;
use super::store::TokenStore;
use crate::api::{ApiClient, RequestBody, RequestOptions, UnauthorizedHandler};
use crate::models::{LoginRequest, LoginResponse, VerifyResponse};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const VERIFY_PATH: &str = "/auth/verify";

/// Message reported when the backend gives no reason for a failed login
pub const GENERIC_LOGIN_FAILURE: &str = "Login failed";

/// How often the background task inspects the stored token
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Remaining lifetime at or below which a refresh is attempted
pub const DEFAULT_REFRESH_THRESHOLD_MINUTES: i64 = 60;

/// Reported user when neither the backend nor the token names one
pub const UNKNOWN_USER: &str = "unknown";

/// Buffer size for the auth event channel
const EVENT_BUFFER_SIZE: usize = 32;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// A stored token is being checked against the backend
    Verifying,
    Authenticated { user: String },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { user } => Some(user),
            _ => None,
        }
    }
}

/// Notifications for anything that reacts to session changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn { user: String },
    LoggedOut,
    TokenRefreshed,
    /// The session was invalidated by the backend; show the login view
    LoginRequired { reason: String },
}

/// Result of [`SessionManager::login`]. A rejected login is an expected
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success { user: String },
    Rejected { message: String },
    /// A logout or another login completed while this one was in flight
    Cancelled,
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The backend returned a new token and it replaced the stored one
    Renewed,
    /// The session is still valid but the backend did not rotate the token
    Unchanged,
    /// The refresh call failed and the session was logged out
    LoggedOut,
    /// The session changed while the refresh was in flight; result dropped
    Stale,
    /// No token installed, nothing to refresh
    NoSession,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub check_interval: Duration,
    pub refresh_threshold: chrono::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            refresh_threshold: chrono::Duration::minutes(DEFAULT_REFRESH_THRESHOLD_MINUTES),
        }
    }
}

// ============================================================================
// Session manager
// ============================================================================

struct Inner {
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    settings: SessionSettings,
    /// Session epoch; also serializes every state transition
    epoch: Mutex<u64>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn persist(&self, token: &str) {
        if let Err(e) = self.store.save(token) {
            warn!(error = %e, "Failed to persist session token");
        }
    }

    /// User for a verified session: the backend's answer, else the token's
    /// `sub`, else whoever was already signed in.
    fn verified_user(&self, reported: Option<String>) -> String {
        reported
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                self.api
                    .token()
                    .and_then(|t| claims::Claims::decode(&t))
                    .and_then(|c| c.sub)
            })
            .or_else(|| self.state_tx.borrow().user().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    /// Tear the session down. Caller holds the epoch lock.
    /// `event` is emitted only if there was a session to end.
    ///
    /// The store is cleared under the lock, so a login cannot persist its
    /// token between the clear and the epoch bump. The file or keychain call
    /// is synchronous and blocks the calling runtime worker while it runs.
    fn end_session(&self, epoch: &mut u64, event: AuthEvent) {
        let was_active = self.api.token().is_some()
            || *self.state_tx.borrow() != SessionState::Unauthenticated;

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove persisted session token");
        }
        self.api.set_auth_token(None);
        *epoch += 1;
        self.set_state(SessionState::Unauthenticated);

        if was_active {
            self.emit(event);
        }
    }
}

/// Ends the session when the backend rejects the installed token
struct SessionInvalidator {
    inner: Weak<Inner>,
}

impl UnauthorizedHandler for SessionInvalidator {
    fn on_unauthorized(&self, token: Option<&str>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let Some(token) = token else {
            debug!("401 on an anonymous request, session untouched");
            return;
        };

        let mut epoch = inner.lock();
        if inner.api.token().as_deref() != Some(token) {
            debug!("401 for a token that is no longer installed, ignoring");
            return;
        }
        warn!("Session rejected by backend, logging out");
        inner.end_session(
            &mut epoch,
            AuthEvent::LoginRequired {
                reason: "Session expired".to_string(),
            },
        );
    }
}

/// Handle to the session. Clone is cheap; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a session manager and register it as `api`'s 401 handler
    pub fn new(api: ApiClient, store: Arc<dyn TokenStore>, settings: SessionSettings) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        let inner = Arc::new(Inner {
            api,
            store,
            settings,
            epoch: Mutex::new(0),
            state_tx,
            events,
        });
        inner.api.set_unauthorized_handler(Arc::new(SessionInvalidator {
            inner: Arc::downgrade(&inner),
        }));

        Self { inner }
    }

    /// The request pipeline carrying this session's token
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch session state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive auth events emitted after this call
    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Remaining lifetime of the stored token, if it has a readable expiry
    pub fn token_expires_in(&self) -> Option<chrono::Duration> {
        let token = self.inner.store.load().ok().flatten()?;
        claims::time_until_expiry(&token, Utc::now())
    }

    /// Restore the persisted session on startup.
    /// Without a stored token the state becomes `Unauthenticated`; otherwise the
    /// token is installed and verified against the backend.
    pub async fn initialize(&self) -> SessionState {
        let stored = match self.inner.store.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session token");
                None
            }
        };

        match stored {
            None => {
                let _epoch = self.inner.lock();
                debug!("No stored session token");
                self.inner.set_state(SessionState::Unauthenticated);
            }
            Some(token) => {
                {
                    let _epoch = self.inner.lock();
                    self.inner.api.set_auth_token(Some(token));
                    self.inner.set_state(SessionState::Verifying);
                }
                debug!("Stored session token found, verifying");
                self.verify().await;
            }
        }

        self.state()
    }

    /// Check the installed token with the backend.
    /// Success authenticates as the returned user; any failure ends the session.
    pub async fn verify(&self) {
        let (epoch, has_token) = {
            let epoch = self.inner.lock();
            (*epoch, self.inner.api.token().is_some())
        };
        if !has_token {
            let mut epoch = self.inner.lock();
            self.inner.end_session(
                &mut epoch,
                AuthEvent::LoginRequired {
                    reason: "No session".to_string(),
                },
            );
            return;
        }

        let result = self.inner.api.get::<VerifyResponse>(VERIFY_PATH).await;

        let mut current = self.inner.lock();
        if *current != epoch {
            debug!("Session changed during verification, dropping result");
            return;
        }
        match result {
            Ok(response) if response.valid != Some(false) => {
                let user = self.inner.verified_user(response.user);
                info!(user = %user, "Session verified");
                self.inner.set_state(SessionState::Authenticated { user });
            }
            Ok(_) => {
                warn!("Backend reported the session token as invalid");
                self.inner.end_session(
                    &mut current,
                    AuthEvent::LoginRequired {
                        reason: "Session could not be verified".to_string(),
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "Session verification failed");
                self.inner.end_session(
                    &mut current,
                    AuthEvent::LoginRequired {
                        reason: "Session could not be verified".to_string(),
                    },
                );
            }
        }
    }

    /// Log in with credentials. Rejections are reported through the outcome,
    /// carrying the backend's message when it sent one.
    pub async fn login(&self, username: &str, password: &str) -> LoginOutcome {
        let epoch = *self.inner.lock();

        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let body = match RequestBody::json(&body) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to build login request");
                return LoginOutcome::Rejected {
                    message: GENERIC_LOGIN_FAILURE.to_string(),
                };
            }
        };

        let result = self
            .inner
            .api
            .request::<LoginResponse>(Method::POST, LOGIN_PATH, body, RequestOptions::new().anonymous())
            .await;

        match result {
            Ok(response) => {
                let mut current = self.inner.lock();
                if *current != epoch {
                    info!("Session changed while login was in flight, discarding");
                    return LoginOutcome::Cancelled;
                }
                if let Some(kind) = response.token_type.as_deref() {
                    if !kind.eq_ignore_ascii_case("bearer") {
                        warn!(token_type = %kind, "Unexpected token type, sending as bearer");
                    }
                }
                *current += 1;
                self.inner.persist(&response.access_token);
                self.inner.api.set_auth_token(Some(response.access_token));
                self.inner.set_state(SessionState::Authenticated {
                    user: username.to_string(),
                });
                self.inner.emit(AuthEvent::LoggedIn {
                    user: username.to_string(),
                });
                info!(user = %username, "Login successful");
                LoginOutcome::Success {
                    user: username.to_string(),
                }
            }
            Err(e) => {
                warn!(user = %username, error = %e, "Login failed");
                LoginOutcome::Rejected {
                    message: e
                        .server_message()
                        .unwrap_or(GENERIC_LOGIN_FAILURE)
                        .to_string(),
                }
            }
        }
    }

    /// End the session. Safe to call when already logged out.
    pub fn logout(&self) {
        let mut epoch = self.inner.lock();
        self.inner.end_session(&mut epoch, AuthEvent::LoggedOut);
        info!("Logged out");
    }

    /// Renew the session through the verify endpoint.
    /// A token in the response replaces the stored one; a failed call logs out.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (epoch, has_token) = {
            let epoch = self.inner.lock();
            (*epoch, self.inner.api.token().is_some())
        };
        if !has_token {
            return RefreshOutcome::NoSession;
        }

        let result = self.inner.api.get::<VerifyResponse>(VERIFY_PATH).await;

        let mut current = self.inner.lock();
        if *current != epoch {
            debug!("Session changed during refresh, dropping result");
            return RefreshOutcome::Stale;
        }
        match result {
            Ok(response) if response.valid != Some(false) => {
                let user = self.inner.verified_user(response.user);
                self.inner.set_state(SessionState::Authenticated { user });
                match response.token.filter(|t| !t.trim().is_empty()) {
                    Some(token) => {
                        self.inner.persist(&token);
                        self.inner.api.set_auth_token(Some(token));
                        self.inner.emit(AuthEvent::TokenRefreshed);
                        info!("Session token refreshed");
                        RefreshOutcome::Renewed
                    }
                    None => {
                        debug!("Session still valid, backend did not rotate the token");
                        RefreshOutcome::Unchanged
                    }
                }
            }
            Ok(_) => {
                warn!("Backend reported the session token as invalid, logging out");
                self.inner.end_session(&mut current, AuthEvent::LoggedOut);
                RefreshOutcome::LoggedOut
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                self.inner.end_session(&mut current, AuthEvent::LoggedOut);
                RefreshOutcome::LoggedOut
            }
        }
    }

    /// One tick of the background expiry check.
    /// Refreshes when the stored token is close to expiry or unreadable;
    /// returns `None` when no refresh was needed.
    pub async fn check_expiry(&self) -> Option<RefreshOutcome> {
        let token = match self.inner.store.load() {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read session token for expiry check");
                return None;
            }
        };

        if !claims::needs_refresh(&token, Utc::now(), self.inner.settings.refresh_threshold) {
            return None;
        }
        info!("Token expires soon, refreshing");
        Some(self.refresh().await)
    }

    /// Start the periodic expiry check.
    /// The task stops when the returned handle is dropped or cancelled, or once
    /// every `SessionManager` clone is gone.
    pub fn spawn_expiry_check(&self) -> ExpiryCheckHandle {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.check_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Session manager dropped, stopping expiry check");
                    break;
                };
                let manager = SessionManager { inner };
                if let Some(outcome) = manager.check_expiry().await {
                    debug!(?outcome, "Expiry check refreshed session");
                }
            }
        });

        ExpiryCheckHandle { task }
    }
}

/// Cancels the background expiry check when dropped
pub struct ExpiryCheckHandle {
    task: JoinHandle<()>,
}

impl ExpiryCheckHandle {
    pub fn cancel(self) {
        // Drop aborts
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ExpiryCheckHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
