//! Core library for clipdeck.
//!
//! Provides the session lifecycle (`auth`), the authenticated request
//! pipeline and typed backend calls (`api`), task polling, wire models, and
//! configuration shared by the clipdeck front ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod tasks;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthEvent, LoginOutcome, RefreshOutcome, SessionManager, SessionSettings, SessionState};
pub use config::Config;
