//! REST API client module for the clipdeck backend.
//!
//! This module provides the `ApiClient` request pipeline, which attaches the
//! session's bearer token to every call and routes 401 responses to a single
//! registered handler, plus typed wrappers for the backend routes.

pub mod client;
pub mod endpoints;
pub mod error;

pub use client::{ApiClient, RequestBody, RequestOptions, UnauthorizedHandler, DEFAULT_BASE_URL};
pub use error::{ApiError, ErrorMessage};
