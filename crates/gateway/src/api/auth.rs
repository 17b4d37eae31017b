//! API authentication middleware.
//!
//! The token is read **once at startup** (see [`crate::bootstrap`]) and only
//! its SHA-256 digest is kept in `AppState`.  Every protected request must
//! carry `Authorization: Bearer <token>`:
//! - missing or malformed header: `401`
//! - wrong token: `403`

use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Axum middleware that enforces bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(provided) = provided else {
        return ApiError::Unauthorized("missing or malformed bearer token".into()).into_response();
    };

    // Compare fixed-length digests in constant time so the token length
    // does not leak.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.as_slice().ct_eq(state.api_token_hash.as_slice())) {
        tracing::debug!(path = %req.uri().path(), "rejected request with invalid API token");
        return ApiError::Forbidden("invalid bearer token".into()).into_response();
    }

    next.run(req).await
}
