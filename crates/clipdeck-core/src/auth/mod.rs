//! Authentication module for managing the session token.
//!
//! This module provides:
//! - `SessionManager`: login, verification, silent refresh, logout, and the
//!   background expiry check
//! - `TokenStore`: durable token storage (file or OS keychain)
//! - `claims`: expiry decoding used to decide when to refresh
//!
//! Tokens are checked every 30 minutes by default and refreshed once less
//! than an hour of lifetime remains.

pub mod claims;
pub mod session;
pub mod store;

pub use session::{
    AuthEvent, ExpiryCheckHandle, LoginOutcome, RefreshOutcome, SessionManager, SessionSettings,
    SessionState, UNKNOWN_USER,
};
pub use store::{open_token_store, FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore, TokenStoreKind};
